//! Callback link parsing
//!
//! The auth server redirects back with its result either in the fragment
//! (implicit grant, errors) or in the query (PKCE `code`, errors). Fragment
//! parameters win when a key appears in both.

use std::collections::HashMap;

use url::Url;

use crate::constants::RECOVERY_CALLBACK_TYPE;
use crate::error::{Error, Result};

/// How the callback delivers the session.
pub enum CallbackGrant {
    /// Tokens carried directly in the link
    Implicit {
        access_token: String,
        refresh_token: String,
        expires_in: Option<u64>,
        token_type: Option<String>,
    },
    /// Authorization code to exchange with the pending PKCE verifier
    Code(String),
}

pub struct Callback {
    pub grant: CallbackGrant,
    /// Set for password-recovery links
    pub recovery: bool,
}

pub fn parse_callback(url: &Url) -> Result<Callback> {
    let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    if let Some(fragment) = url.fragment() {
        params.extend(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
    }

    if let Some(error) = params.get("error_description").or_else(|| params.get("error")) {
        let code = params.get("error_code").map(String::as_str).unwrap_or("unknown");
        return Err(Error::Callback(format!("{error} (code: {code})")));
    }

    let recovery = params.get("type").map(String::as_str) == Some(RECOVERY_CALLBACK_TYPE);

    if let Some(access_token) = params.remove("access_token") {
        let refresh_token = params
            .remove("refresh_token")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::Callback("callback has access_token but no refresh_token".into())
            })?;
        let expires_in = params
            .get("expires_in")
            .map(|raw| {
                raw.parse::<u64>()
                    .map_err(|e| Error::Callback(format!("invalid expires_in {raw:?}: {e}")))
            })
            .transpose()?;
        return Ok(Callback {
            grant: CallbackGrant::Implicit {
                access_token,
                refresh_token,
                expires_in,
                token_type: params.remove("token_type"),
            },
            recovery,
        });
    }

    if let Some(code) = params.remove("code").filter(|c| !c.is_empty()) {
        return Ok(Callback {
            grant: CallbackGrant::Code(code),
            recovery,
        });
    }

    Err(Error::Callback("callback link carries no session".into()))
}
