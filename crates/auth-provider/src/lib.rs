//! Authentication provider contract
//!
//! Defines the `AuthProvider` trait that decouples session coordination from
//! the authentication protocol. The coordinator only reacts to `Session`
//! values and auth-change events; token exchange, refresh and verification
//! live behind this trait (see the `gotrue-auth` crate for an implementation).

pub mod event;
pub mod listeners;
pub mod session;

pub use event::{AuthChangeEvent, AuthChangeKind};
pub use listeners::{AuthChangeHandler, AuthListeners, AuthSubscription};
pub use session::{Session, User, unix_now_secs};

use std::future::Future;
use std::pin::Pin;
use url::Url;

/// Errors from provider operations (session recovery, callback completion).
///
/// The coordinator treats both variants the same way (logged, non-fatal), but
/// callers of the provider can tell a rejected session apart from a transport
/// failure with [`ProviderError::is_rejection`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Token material is invalid, expired, replayed, or the callback carried an error
    #[error("session rejected: {0}")]
    Rejected(String),

    /// Network failure, unexpected status, or malformed response
    #[error("provider transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, ProviderError::Rejected(_))
    }
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Boxed future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Abstraction over the object that owns the real authentication protocol.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn AuthProvider>`).
pub trait AuthProvider: Send + Sync {
    /// Identifier for logging (e.g. "gotrue")
    fn id(&self) -> &str;

    /// Register a handler for auth-change events.
    ///
    /// Events are delivered in the order the provider produces them. The
    /// handler stays registered until the returned subscription is dropped
    /// or unsubscribed.
    fn on_auth_state_change(&self, handler: AuthChangeHandler) -> AuthSubscription;

    /// Rebuild a live session from its persisted form, refreshing it if needed.
    fn recover_session<'a>(&'a self, persisted: &'a str) -> ProviderFuture<'a, Session>;

    /// Finish a pending sign-in from the URL the browser redirected back with.
    fn complete_from_callback_url<'a>(&'a self, url: &'a Url) -> ProviderFuture<'a, Session>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_is_distinguishable_from_transport() {
        assert!(ProviderError::Rejected("refresh token revoked".into()).is_rejection());
        assert!(!ProviderError::Transport("connection reset".into()).is_rejection());
    }

    #[test]
    fn error_display_includes_context() {
        let err = ProviderError::Rejected("invalid_grant".into());
        assert_eq!(err.to_string(), "session rejected: invalid_grant");
        let err = ProviderError::Transport("timed out".into());
        assert_eq!(err.to_string(), "provider transport error: timed out");
    }
}
