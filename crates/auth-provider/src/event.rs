//! Auth-change events produced by the provider

use crate::session::Session;

/// Kind of auth-state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthChangeKind {
    SignedIn,
    SignedOut,
    UserUpdated,
    UserDeleted,
    PasswordRecovery,
    TokenRefreshed,
}

impl AuthChangeKind {
    /// Label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            AuthChangeKind::SignedIn => "signed_in",
            AuthChangeKind::SignedOut => "signed_out",
            AuthChangeKind::UserUpdated => "user_updated",
            AuthChangeKind::UserDeleted => "user_deleted",
            AuthChangeKind::PasswordRecovery => "password_recovery",
            AuthChangeKind::TokenRefreshed => "token_refreshed",
        }
    }
}

/// An auth-state change paired with the session it concerns, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChangeEvent {
    pub kind: AuthChangeKind,
    pub session: Option<Session>,
}

impl AuthChangeEvent {
    pub fn new(kind: AuthChangeKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }

    pub fn signed_in(session: Session) -> Self {
        Self::new(AuthChangeKind::SignedIn, Some(session))
    }

    pub fn signed_out() -> Self {
        Self::new(AuthChangeKind::SignedOut, None)
    }
}
