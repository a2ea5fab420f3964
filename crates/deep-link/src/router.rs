//! Deep-link router
//!
//! Owns the one-shot guarantee on the initial link and the live link
//! subscription. Matching links are handed to the provider's callback
//! completion; every failure along the way goes to the error reporter and
//! never ends the subscription or propagates to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use auth_provider::{AuthProvider, ProviderError};
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::filter::CallbackHostFilter;
use crate::source::{LinkError, LinkSource};

/// Failure observed while routing links.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// The link source failed or produced a malformed link
    #[error(transparent)]
    Link(LinkError),

    /// The provider refused to complete a sign-in from a callback link
    #[error("callback completion failed: {0}")]
    Callback(ProviderError),
}

/// Callback receiving routing failures.
pub type ErrorReporter = Arc<dyn Fn(&RouteError) + Send + Sync>;

/// Default reporter: log and carry on.
pub fn log_route_error(error: &RouteError) {
    match error {
        RouteError::Link(e) => warn!(error = %e, "deep link error"),
        RouteError::Callback(e) => warn!(
            error = %e,
            rejected = e.is_rejection(),
            "failed to complete session from callback link"
        ),
    }
}

/// What happened to a single candidate link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDisposition {
    /// Not an auth callback; left for other consumers
    Ignored,
    /// Provider completed a session from the link
    Completed,
    /// Provider refused the link; reported through the error callback
    Failed,
}

impl LinkDisposition {
    pub fn label(&self) -> &'static str {
        match self {
            LinkDisposition::Ignored => "ignored",
            LinkDisposition::Completed => "completed",
            LinkDisposition::Failed => "failed",
        }
    }
}

/// Routes incoming deep links to the auth provider.
pub struct DeepLinkRouter {
    source: Arc<dyn LinkSource>,
    provider: Arc<dyn AuthProvider>,
    filter: CallbackHostFilter,
    on_error: ErrorReporter,
    /// Once-per-process fact; never reset by stop/start
    initial_link_consumed: AtomicBool,
    live: Mutex<Option<JoinHandle<()>>>,
}

impl DeepLinkRouter {
    pub fn new(
        source: Arc<dyn LinkSource>,
        provider: Arc<dyn AuthProvider>,
        filter: CallbackHostFilter,
    ) -> Self {
        Self {
            source,
            provider,
            filter,
            on_error: Arc::new(log_route_error),
            initial_link_consumed: AtomicBool::new(false),
            live: Mutex::new(None),
        }
    }

    pub fn with_error_reporter(mut self, reporter: ErrorReporter) -> Self {
        self.on_error = reporter;
        self
    }

    pub fn filter(&self) -> &CallbackHostFilter {
        &self.filter
    }

    pub fn initial_link_consumed(&self) -> bool {
        self.initial_link_consumed.load(Ordering::SeqCst)
    }

    /// Whether the live link subscription is active.
    pub fn is_listening(&self) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Subscribe to live links, then consume the initial link (at most once
    /// per router, no matter how often `start` runs).
    pub async fn start(self: &Arc<Self>) {
        self.listen();
        self.consume_initial_link().await;
    }

    /// Cancel the live subscription. The initial-link flag is left as-is.
    pub fn stop(&self) {
        let handle = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("deep link subscription cancelled");
        }
    }

    fn listen(self: &Arc<Self>) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if live.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("deep link subscription already active");
            return;
        }

        let Some(mut links) = self.source.live_links() else {
            debug!("link source has no live stream, skipping subscription");
            return;
        };

        // Weak so an un-stopped router can still be dropped
        let router: Weak<Self> = Arc::downgrade(self);
        *live = Some(tokio::spawn(async move {
            while let Some(item) = links.next().await {
                let Some(router) = router.upgrade() else {
                    break;
                };
                match item {
                    Ok(Some(url)) => {
                        router.dispatch(&url).await;
                    }
                    Ok(None) => debug!("ignoring empty link"),
                    Err(e) => router.report(RouteError::Link(e)),
                }
            }
            debug!("live link stream ended");
        }));
        debug!("subscribed to live deep links");
    }

    async fn consume_initial_link(&self) {
        // Flag flips before the fetch so a concurrent start() cannot race past it
        if self.initial_link_consumed.swap(true, Ordering::SeqCst) {
            debug!("initial link already consumed");
            return;
        }

        match self.source.initial_link().await {
            Ok(Some(url)) => {
                debug!(host = ?url.host_str(), "handling initial link");
                self.dispatch(&url).await;
            }
            Ok(None) => debug!("process was not launched with a link"),
            Err(e) => self.report(RouteError::Link(e)),
        }
    }

    /// Filter a candidate link and, if it is an auth callback, complete the
    /// session through the provider.
    pub async fn dispatch(&self, url: &Url) -> LinkDisposition {
        let disposition = if !self.filter.matches(url) {
            debug!(host = ?url.host_str(), "link is not an auth callback, ignoring");
            LinkDisposition::Ignored
        } else {
            // Never log the full URL: callback links carry tokens
            match self.provider.complete_from_callback_url(url).await {
                Ok(session) => {
                    info!(
                        host = ?url.host_str(),
                        user_id = ?session.user_id(),
                        "completed session from callback link"
                    );
                    LinkDisposition::Completed
                }
                Err(e) => {
                    self.report(RouteError::Callback(e));
                    LinkDisposition::Failed
                }
            }
        };
        metrics::counter!("session_deep_links_total", "outcome" => disposition.label())
            .increment(1);
        disposition
    }

    fn report(&self, error: RouteError) {
        (self.on_error)(&error);
    }
}

impl Drop for DeepLinkRouter {
    fn drop(&mut self) {
        self.stop();
    }
}
