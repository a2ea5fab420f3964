//! Session value owned by the authentication provider
//!
//! The coordinator never inspects a session beyond its persisted form. The
//! persisted form is a JSON document; `expires_at` is an absolute unix
//! timestamp in seconds.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{ProviderError, Result};

/// Authenticated identity attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// An authenticated session: token material plus the identity it belongs to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expiration as unix timestamp in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Build a session from a token response, converting `expires_in`
    /// (seconds delta) into an absolute expiry.
    pub fn from_tokens(
        access_token: String,
        refresh_token: String,
        expires_in: Option<u64>,
        user: Option<User>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: default_token_type(),
            expires_at: expires_in.map(|secs| unix_now_secs() + secs),
            user,
        }
    }

    /// Serialized form written to the session store.
    pub fn to_persisted(&self) -> String {
        let mut doc = serde_json::json!({
            "access_token": self.access_token,
            "refresh_token": self.refresh_token,
            "token_type": self.token_type,
        });
        if let Some(expires_at) = self.expires_at {
            doc["expires_at"] = serde_json::json!(expires_at);
        }
        if let Some(user) = &self.user {
            doc["user"] = serde_json::json!({ "id": user.id, "email": user.email });
        }
        doc.to_string()
    }

    /// Parse a persisted record. Malformed records are a rejection, not a
    /// transport failure: retrying will never make them valid.
    pub fn from_persisted(persisted: &str) -> Result<Self> {
        let session: Session = serde_json::from_str(persisted)
            .map_err(|e| ProviderError::Rejected(format!("malformed persisted session: {e}")))?;
        if session.refresh_token.is_empty() {
            return Err(ProviderError::Rejected(
                "persisted session has no refresh token".into(),
            ));
        }
        Ok(session)
    }

    /// Whether the access token expires within `margin` from now.
    /// Sessions without an expiry never report as expiring.
    pub fn expires_within(&self, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= unix_now_secs().saturating_add(margin.as_secs()),
            None => false,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Current wall-clock time as unix seconds.
pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
