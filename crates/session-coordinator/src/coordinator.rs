//! Session coordinator state machine
//!
//! `initialize` wires the collaborators together in a fixed order:
//!
//! 1. Record the store and callback host filter
//! 2. Subscribe to provider auth events (queued until the store is ready)
//! 3. Initialize the store and start the event task (persist, then forward)
//! 4. Recover a persisted session, if any, into the initial-session cell
//! 5. Register for lifecycle transitions
//! 6. Start the deep-link router
//! 7. Resolve the initial-session cell with `None` if still empty
//!
//! A failure in steps 1-6 resolves the cell with that failure before the
//! error is returned, so nobody waiting on the initial session hangs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use auth_provider::{
    AuthChangeEvent, AuthChangeHandler, AuthChangeKind, AuthProvider, AuthSubscription, Session,
};
use deep_link::{CallbackHostFilter, DeepLinkRouter, LinkSource};
use session_store::SessionStore;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broadcast::{AuthBroadcast, AuthChangeStream};
use crate::error::{Error, Result};
use crate::initial::InitialSession;
use crate::lifecycle::{AppLifecycleState, LifecycleHost};

/// Settings supplied at `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Host identifying auth-callback links; `None` treats every link as one
    pub callback_host: Option<String>,
}

impl CoordinatorConfig {
    pub fn with_callback_host(host: impl Into<String>) -> Self {
        Self {
            callback_host: Some(host.into()),
        }
    }
}

/// Result of recovering the persisted session on foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundRecovery {
    NoPersistedSession,
    Recovered,
    /// Recovery failed and the persisted record was deleted
    Discarded,
}

impl ForegroundRecovery {
    pub fn is_recovered(&self) -> bool {
        matches!(self, ForegroundRecovery::Recovered)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ForegroundRecovery::NoPersistedSession => "no_session",
            ForegroundRecovery::Recovered => "recovered",
            ForegroundRecovery::Discarded => "discarded",
        }
    }
}

/// Collaborators and task handles that live from `initialize` to `dispose`.
struct Wiring {
    store: Arc<dyn SessionStore>,
    broadcast: Arc<AuthBroadcast>,
    router: Arc<DeepLinkRouter>,
    handles: Mutex<Handles>,
}

#[derive(Default)]
struct Handles {
    subscription: Option<AuthSubscription>,
    lifecycle: Option<JoinHandle<()>>,
}

impl Wiring {
    fn handles(&self) -> MutexGuard<'_, Handles> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Idempotent.
    fn teardown(&self) {
        self.broadcast.close();
        let (subscription, lifecycle) = {
            let mut handles = self.handles();
            (handles.subscription.take(), handles.lifecycle.take())
        };
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        self.router.stop();
        if let Some(task) = lifecycle {
            task.abort();
        }
    }
}

enum Phase {
    Uninitialized,
    Initializing(Arc<Wiring>),
    Ready(Arc<Wiring>),
    Disposed,
}

struct Inner {
    provider: Arc<dyn AuthProvider>,
    link_source: Arc<dyn LinkSource>,
    lifecycle: Arc<dyn LifecycleHost>,
    initial: InitialSession,
    phase: Mutex<Phase>,
}

impl Inner {
    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wiring(&self) -> Result<Arc<Wiring>> {
        match &*self.phase() {
            Phase::Uninitialized => Err(Error::Uninitialized),
            Phase::Initializing(wiring) | Phase::Ready(wiring) => Ok(wiring.clone()),
            Phase::Disposed => Err(Error::Disposed),
        }
    }
}

/// Handle to the process-wide session coordinator.
///
/// Construct once at startup and pass clones to consumers; all clones share
/// the same state.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    pub fn new(
        provider: Arc<dyn AuthProvider>,
        link_source: Arc<dyn LinkSource>,
        lifecycle: Arc<dyn LifecycleHost>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                link_source,
                lifecycle,
                initial: InitialSession::new(),
                phase: Mutex::new(Phase::Uninitialized),
            }),
        }
    }

    /// Bring the coordinator up. May only succeed once per instance; a
    /// second call fails with `AlreadyInitialized`.
    ///
    /// Only store failures are fatal here. A persisted session the provider
    /// refuses is reported through `initial_session`, not as an error.
    pub async fn initialize(
        &self,
        store: Arc<dyn SessionStore>,
        config: CoordinatorConfig,
    ) -> Result<()> {
        let wiring = {
            let mut phase = self.inner.phase();
            match &*phase {
                Phase::Uninitialized => {}
                Phase::Initializing(_) | Phase::Ready(_) => return Err(Error::AlreadyInitialized),
                Phase::Disposed => return Err(Error::Disposed),
            }
            let router = DeepLinkRouter::new(
                self.inner.link_source.clone(),
                self.inner.provider.clone(),
                CallbackHostFilter::new(config.callback_host.clone()),
            );
            let wiring = Arc::new(Wiring {
                store,
                broadcast: Arc::new(AuthBroadcast::new()),
                router: Arc::new(router),
                handles: Mutex::new(Handles::default()),
            });
            *phase = Phase::Initializing(wiring.clone());
            wiring
        };

        info!(
            provider = self.inner.provider.id(),
            callback_host = ?config.callback_host,
            "initializing session coordinator"
        );

        if let Err(e) = self.start_up(&wiring).await {
            error!(error = %e, "session coordinator initialization failed");
            self.inner.initial.resolve(Err(e.clone()));
            wiring.teardown();
            *self.inner.phase() = Phase::Disposed;
            return Err(e);
        }

        if self.inner.initial.resolve(Ok(None)) {
            info!("no persisted session, starting signed out");
        }

        let ready = {
            let mut phase = self.inner.phase();
            if matches!(*phase, Phase::Initializing(_)) {
                *phase = Phase::Ready(wiring.clone());
                true
            } else {
                false
            }
        };
        if !ready {
            // dispose() ran while startup was in flight
            wiring.teardown();
            return Err(Error::Disposed);
        }

        info!("session coordinator initialized");
        Ok(())
    }

    async fn start_up(&self, wiring: &Arc<Wiring>) -> Result<()> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handler: AuthChangeHandler = Arc::new(move |event: &AuthChangeEvent| {
            // Closed receiver: coordinator torn down, event dropped
            let _ = events_tx.send(event.clone());
        });
        let subscription = self.inner.provider.on_auth_state_change(handler);
        wiring.handles().subscription = Some(subscription);

        wiring.store.initialize().await?;
        tokio::spawn(pump_events(
            events_rx,
            wiring.store.clone(),
            wiring.broadcast.clone(),
        ));

        if wiring.store.has_record().await? {
            if let Some(record) = wiring.store.read_record().await? {
                self.recover_at_startup(&record).await;
            }
        }

        let observer = self.inner.lifecycle.observe();
        let task = tokio::spawn(watch_lifecycle(observer, Arc::downgrade(&self.inner)));
        wiring.handles().lifecycle = Some(task);

        wiring.router.start().await;
        Ok(())
    }

    async fn recover_at_startup(&self, record: &str) {
        match self.inner.provider.recover_session(record).await {
            Ok(session) => {
                info!(user_id = ?session.user_id(), "recovered persisted session");
                record_recovery("startup", "recovered");
                self.inner.initial.resolve(Ok(Some(session)));
            }
            Err(e) => {
                // Record is kept on this path
                warn!(
                    error = %e,
                    rejected = e.is_rejection(),
                    "persisted session could not be recovered at startup"
                );
                record_recovery("startup", "failed");
                self.inner.initial.resolve(Err(Error::Provider(e)));
            }
        }
    }

    /// Tear down: close the broadcast, unsubscribe from the provider, stop
    /// the link router and drop the lifecycle observer. In-flight store or
    /// provider calls are not cancelled. Calling it again is a no-op.
    pub fn dispose(&self) -> Result<()> {
        let previous = {
            let mut phase = self.inner.phase();
            if matches!(*phase, Phase::Uninitialized) {
                return Err(Error::Uninitialized);
            }
            std::mem::replace(&mut *phase, Phase::Disposed)
        };
        match previous {
            Phase::Initializing(wiring) | Phase::Ready(wiring) => {
                wiring.teardown();
                info!("session coordinator disposed");
            }
            Phase::Uninitialized | Phase::Disposed => {
                debug!("session coordinator already disposed")
            }
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        matches!(*self.inner.phase(), Phase::Ready(_))
    }

    /// Subscribe to auth-change events, delivered in provider order.
    pub fn on_auth_change(&self) -> Result<AuthChangeStream> {
        Ok(self.inner.wiring()?.broadcast.subscribe())
    }

    /// The session recovered at startup, `None` if there was nothing to
    /// recover, or the startup failure. Waits for `initialize` to get there.
    pub async fn initial_session(&self) -> Result<Option<Session>> {
        let uninitialized = matches!(*self.inner.phase(), Phase::Uninitialized);
        if uninitialized {
            return Err(Error::Uninitialized);
        }
        self.inner.initial.wait().await
    }

    /// Whether a session record is persisted.
    pub async fn has_access_token(&self) -> Result<bool> {
        let wiring = self.inner.wiring()?;
        Ok(wiring.store.has_record().await?)
    }

    /// The persisted session record (the serialized session carrying the
    /// access token), if any.
    pub async fn access_token(&self) -> Result<Option<String>> {
        let wiring = self.inner.wiring()?;
        Ok(wiring.store.read_record().await?)
    }

    /// Re-read the persisted record and hand it to the provider. A record
    /// the provider refuses is deleted.
    pub async fn recover_on_foreground(&self) -> Result<ForegroundRecovery> {
        let wiring = self.inner.wiring()?;
        let Some(record) = wiring.store.read_record().await? else {
            debug!("no persisted session to recover");
            record_recovery("foreground", ForegroundRecovery::NoPersistedSession.label());
            return Ok(ForegroundRecovery::NoPersistedSession);
        };

        let outcome = match self.inner.provider.recover_session(&record).await {
            Ok(session) => {
                info!(user_id = ?session.user_id(), "session recovered on foreground");
                ForegroundRecovery::Recovered
            }
            Err(e) => {
                warn!(
                    error = %e,
                    rejected = e.is_rejection(),
                    "discarding persisted session that failed recovery"
                );
                if let Err(e) = wiring.store.delete_record().await {
                    warn!(error = %e, "failed to delete unrecoverable session record");
                }
                ForegroundRecovery::Discarded
            }
        };
        record_recovery("foreground", outcome.label());
        Ok(outcome)
    }
}

/// Persist, then forward, every provider event in arrival order.
async fn pump_events(
    mut events: mpsc::UnboundedReceiver<AuthChangeEvent>,
    store: Arc<dyn SessionStore>,
    broadcast: Arc<AuthBroadcast>,
) {
    while let Some(event) = events.recv().await {
        persist(store.as_ref(), &event).await;

        let kind = event.kind.label();
        metrics::counter!("session_auth_events_total", "kind" => kind).increment(1);
        let delivered = broadcast.publish(event);
        debug!(kind, subscribers = delivered, "auth change forwarded");
    }
    debug!("auth event stream ended");
}

async fn persist(store: &dyn SessionStore, event: &AuthChangeEvent) {
    let kind = event.kind.label();
    let result = match (event.kind, &event.session) {
        (AuthChangeKind::SignedIn | AuthChangeKind::TokenRefreshed, Some(session)) => {
            store.write_record(&session.to_persisted()).await
        }
        (AuthChangeKind::SignedOut | AuthChangeKind::UserDeleted, _) => {
            store.delete_record().await
        }
        _ => return,
    };
    match result {
        Ok(()) => debug!(kind, "persisted session updated"),
        Err(e) => warn!(kind, error = %e, "failed to persist auth change"),
    }
}

async fn watch_lifecycle(
    mut observer: broadcast::Receiver<AppLifecycleState>,
    coordinator: Weak<Inner>,
) {
    loop {
        let state = match observer.recv().await {
            Ok(state) => state,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "lifecycle observer lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if state != AppLifecycleState::Resumed {
            debug!(state = state.label(), "ignoring lifecycle transition");
            continue;
        }
        let Some(inner) = coordinator.upgrade() else {
            break;
        };
        let handle = SessionCoordinator { inner };
        match handle.recover_on_foreground().await {
            Ok(outcome) => debug!(outcome = outcome.label(), "foreground recovery finished"),
            Err(e) => warn!(error = %e, "foreground recovery failed"),
        }
    }
    debug!("lifecycle observer stopped");
}

fn record_recovery(path: &'static str, outcome: &'static str) {
    metrics::counter!("session_recoveries_total", "path" => path, "outcome" => outcome)
        .increment(1);
}
