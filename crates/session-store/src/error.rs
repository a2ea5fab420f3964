//! Error types for session storage

/// Errors from session store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("session store used before initialize()")]
    NotInitialized,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("session store parse error: {0}")]
    Parse(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
