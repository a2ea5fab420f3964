//! Error types for the session coordinator

use auth_provider::ProviderError;

/// Errors from coordinator operations.
///
/// `Clone` so a startup failure can be stored in the initial-session cell
/// and handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("session coordinator used before initialize()")]
    Uninitialized,

    #[error("session coordinator is already initialized")]
    AlreadyInitialized,

    #[error("session coordinator has been disposed")]
    Disposed,

    #[error("session store error: {0}")]
    Store(#[from] session_store::Error),

    #[error("{0}")]
    Provider(#[from] ProviderError),
}

/// Result alias for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;
