//! Session Agent
//!
//! Long-running process that keeps a GoTrue session alive for the host:
//! 1. Recovers the persisted session at startup
//! 2. Receives auth-callback redirects on a loopback listener and completes
//!    sign-ins through them
//! 3. Refreshes the session before it expires and persists every change
//! 4. Exposes a local control API for lifecycle reports, sign-in/out and
//!    auth-event streaming

mod config;
mod control;
mod links;
mod metrics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use deep_link::ChannelLinkSource;
use gotrue_auth::{GoTrueClient, GoTrueConfig, SystemBrowser, spawn_refresh_task};
use session_coordinator::{CoordinatorConfig, LifecycleHub, SessionCoordinator};
use session_store::FileSessionStore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::control::ControlState;

/// How long in-flight HTTP requests get after the shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Command-line arguments
#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    config: Option<String>,
    /// Link the agent was launched with, e.g. by a URL-scheme handler
    link: Option<String>,
}

fn parse_args(args: &[String]) -> Args {
    let value_of = |flag: &str| {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .cloned()
    };
    Args {
        config: value_of("--config"),
        link: value_of("--link"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting session-agent");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    let raw_args: Vec<String> = std::env::args().collect();
    let args = parse_args(&raw_args);

    let config_path = Config::resolve_path(args.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        auth_url = %config.auth.url,
        store = %config.storage.path.display(),
        links_addr = %config.links.listen_addr,
        control_addr = %config.control.listen_addr,
        callback_host = ?config.auth.callback_host,
        "configuration loaded"
    );

    let anon_key = config
        .auth
        .anon_key
        .clone()
        .context("anon key missing after config load")?;
    let gotrue_config = GoTrueConfig::new(config.auth.gotrue_url()?, anon_key)
        .with_refresh_threshold(config.auth.refresh_threshold());
    let client = Arc::new(GoTrueClient::new(gotrue_config));

    let store = Arc::new(FileSessionStore::with_key(
        config.storage.path.clone(),
        config.storage.persist_key.clone(),
    ));
    let (link_source, link_sender) = ChannelLinkSource::new(args.link);
    let lifecycle = LifecycleHub::new();
    let coordinator = SessionCoordinator::new(
        client.clone(),
        Arc::new(link_source),
        Arc::new(lifecycle.clone()),
    );

    // Listeners come up before initialize so /health can report startup
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let links_listener = TcpListener::bind(config.links.listen_addr)
        .await
        .with_context(|| format!("failed to bind link listener to {}", config.links.listen_addr))?;
    let links_server = spawn_server(
        "links",
        links_listener,
        links::build_router(link_sender, config.links.listen_addr),
        shutdown_rx.clone(),
    );

    let control_state = ControlState {
        coordinator: coordinator.clone(),
        client: client.clone(),
        lifecycle,
        launcher: Arc::new(SystemBrowser),
        redirect_to: config.redirect_to(),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };
    let control_listener = TcpListener::bind(config.control.listen_addr)
        .await
        .with_context(|| {
            format!("failed to bind control listener to {}", config.control.listen_addr)
        })?;
    let control_server = spawn_server(
        "control",
        control_listener,
        control::build_router(control_state, config.control.max_connections),
        shutdown_rx,
    );

    let coordinator_config = CoordinatorConfig {
        callback_host: config.auth.callback_host.clone(),
    };
    coordinator
        .initialize(store, coordinator_config)
        .await
        .context("failed to initialize session coordinator")?;

    match coordinator.initial_session().await {
        Ok(Some(session)) => info!(user_id = ?session.user_id(), "restored persisted session"),
        Ok(None) => info!("no persisted session, waiting for sign-in"),
        Err(e) => warn!(error = %e, "persisted session could not be restored"),
    }

    let refresh_task = spawn_refresh_task(client, config.auth.refresh_interval());
    info!("session-agent running");

    shutdown_signal().await;

    let _ = shutdown_tx.send(true);
    refresh_task.abort();

    // The drain timeout starts at signal receipt
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        for (name, server) in [("links", links_server), ("control", control_server)] {
            match server.await {
                Ok(Ok(())) => info!(server = name, "server drained"),
                Ok(Err(e)) => error!(server = name, error = %e, "server error during shutdown"),
                Err(e) => error!(server = name, error = %e, "server task panicked"),
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        );
    }

    if let Err(e) = coordinator.dispose() {
        warn!(error = %e, "coordinator dispose failed");
    }

    info!("shutdown complete");
    Ok(())
}

fn spawn_server(
    name: &'static str,
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<std::io::Result<()>> {
    if let Ok(addr) = listener.local_addr() {
        info!(server = name, addr = %addr, "listening");
    }
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
    })
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
