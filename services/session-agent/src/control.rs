//! Local control API
//!
//! Lets the host application (or an operator with curl) drive the session:
//! report lifecycle transitions, start and end sign-ins, inspect the current
//! session and follow auth events as server-sent events. Tokens are never
//! returned by any route.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use auth_provider::AuthChangeEvent;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures_util::StreamExt;
use gotrue_auth::{BrowserLauncher, GoTrueClient};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use session_coordinator::{AppLifecycleState, LifecycleHub, SessionCoordinator};
use tracing::{info, warn};

use crate::metrics;

/// Shared state for the control routes
#[derive(Clone)]
pub struct ControlState {
    pub coordinator: SessionCoordinator,
    pub client: Arc<GoTrueClient>,
    pub lifecycle: LifecycleHub,
    pub launcher: Arc<dyn BrowserLauncher>,
    pub redirect_to: String,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

/// Build the control router. `max_connections` bounds concurrent requests.
pub fn build_router(state: ControlState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/session", get(session_handler))
        .route("/events", get(events_handler))
        .route("/lifecycle/{state}", post(lifecycle_handler))
        .route("/recover", post(recover_handler))
        .route("/sign-in/{provider}", post(sign_in_handler))
        .route("/sign-out", post(sign_out_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn error_response(status: StatusCode, error: impl std::fmt::Display) -> Response {
    json_response(status, json!({ "error": error.to_string() }))
}

/// 200 once the coordinator is initialized, 503 while it starts up or after
/// it has been disposed.
async fn health_handler(State(state): State<ControlState>) -> Response {
    let initialized = state.coordinator.is_initialized();
    let status = if initialized {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_response(
        status,
        json!({
            "status": if initialized { "healthy" } else { "unavailable" },
            "initialized": initialized,
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        }),
    )
}

async fn metrics_handler(State(state): State<ControlState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn session_handler(State(state): State<ControlState>) -> Response {
    let persisted = match state.coordinator.has_access_token().await {
        Ok(persisted) => persisted,
        Err(e) => return error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    };
    let current = state.client.current_session().await;
    json_response(
        StatusCode::OK,
        json!({
            "persisted": persisted,
            "signed_in": current.is_some(),
            "user_id": current.as_ref().and_then(|s| s.user_id()),
            "expires_at": current.as_ref().and_then(|s| s.expires_at),
        }),
    )
}

fn event_payload(event: &AuthChangeEvent) -> Event {
    let session = event.session.as_ref();
    let data = json!({
        "kind": event.kind.label(),
        "user_id": session.and_then(|s| s.user_id()),
        "expires_at": session.and_then(|s| s.expires_at),
    });
    Event::default()
        .event(event.kind.label())
        .data(data.to_string())
}

async fn events_handler(State(state): State<ControlState>) -> Response {
    match state.coordinator.on_auth_change() {
        Ok(stream) => {
            let events = stream.map(|event| Ok::<_, Infallible>(event_payload(&event)));
            Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

async fn lifecycle_handler(
    State(state): State<ControlState>,
    Path(raw): Path<String>,
) -> Response {
    let lifecycle_state = match raw.parse::<AppLifecycleState>() {
        Ok(s) => s,
        Err(e) => {
            metrics::record_command("lifecycle", false);
            return error_response(StatusCode::BAD_REQUEST, e);
        }
    };
    let observers = state.lifecycle.notify(lifecycle_state);
    metrics::record_command("lifecycle", true);
    json_response(
        StatusCode::ACCEPTED,
        json!({ "state": lifecycle_state.label(), "observers": observers }),
    )
}

async fn recover_handler(State(state): State<ControlState>) -> Response {
    match state.coordinator.recover_on_foreground().await {
        Ok(outcome) => {
            metrics::record_command("recover", true);
            json_response(StatusCode::OK, json!({ "outcome": outcome.label() }))
        }
        Err(e) => {
            metrics::record_command("recover", false);
            error_response(StatusCode::SERVICE_UNAVAILABLE, e)
        }
    }
}

async fn sign_in_handler(
    State(state): State<ControlState>,
    Path(provider): Path<String>,
) -> Response {
    let attempt_id = format!("signin_{}", uuid::Uuid::new_v4().as_simple());
    let result = state
        .client
        .sign_in_with_provider(&provider, &state.redirect_to, None, state.launcher.as_ref())
        .await;
    match result {
        Ok(url) => {
            metrics::record_command("sign_in", true);
            info!(attempt_id = %attempt_id, provider = %provider, "sign-in started");
            json_response(
                StatusCode::ACCEPTED,
                json!({ "attempt_id": attempt_id, "authorize_url": url.as_str() }),
            )
        }
        Err(e) => {
            metrics::record_command("sign_in", false);
            warn!(
                attempt_id = %attempt_id,
                provider = %provider,
                error = %e,
                "sign-in could not start"
            );
            error_response(StatusCode::BAD_GATEWAY, e)
        }
    }
}

async fn sign_out_handler(State(state): State<ControlState>) -> Response {
    state.client.sign_out().await;
    metrics::record_command("sign_out", true);
    json_response(StatusCode::OK, json!({ "status": "signed_out" }))
}
