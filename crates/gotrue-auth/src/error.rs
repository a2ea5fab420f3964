//! Error types for GoTrue operations

use auth_provider::ProviderError;

/// Errors from GoTrue operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("invalid callback: {0}")]
    Callback(String),

    #[error("browser launch failed: {0}")]
    Browser(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias for GoTrue operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for ProviderError {
    fn from(err: Error) -> Self {
        match &err {
            Error::InvalidCredentials(_) | Error::Callback(_) => {
                ProviderError::Rejected(err.to_string())
            }
            Error::Http(_) | Error::TokenExchange(_) | Error::Browser(_) | Error::Config(_) => {
                ProviderError::Transport(err.to_string())
            }
        }
    }
}
