//! Token endpoint and user lookups
//!
//! All requests carry the anon key in the `apikey` header. Grants go to
//! `TOKEN_PATH?grant_type=...` with a JSON body:
//! - `refresh_token`: `{"refresh_token": ...}`
//! - `pkce`: `{"auth_code": ..., "code_verifier": ...}`
//!
//! 400/401/403 from the auth server mean the token material itself is bad
//! and surface as `Error::InvalidCredentials`; anything else is transient.

use std::fmt;

use auth_provider::{Session, User};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::config::GoTrueConfig;
use crate::constants::{API_KEY_HEADER, LOGOUT_PATH, TOKEN_PATH, USER_PATH};
use crate::error::{Error, Result};

/// Response from the token endpoint.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Absolute expiry in unix seconds, when the server sends one
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub user: Option<User>,
}

impl TokenResponse {
    pub fn into_session(self) -> Session {
        let mut session = Session::from_tokens(
            self.access_token,
            self.refresh_token,
            self.expires_in,
            self.user,
        );
        if self.expires_at.is_some() {
            session.expires_at = self.expires_at;
        }
        if let Some(token_type) = self.token_type {
            session.token_type = token_type;
        }
        session
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("user", &self.user)
            .finish()
    }
}

/// Exchange a refresh token for a new session.
pub async fn refresh_token(
    client: &reqwest::Client,
    config: &GoTrueConfig,
    refresh: &str,
) -> Result<TokenResponse> {
    let body = serde_json::json!({ "refresh_token": refresh });
    post_grant(client, config, "refresh_token", body).await
}

/// Exchange an authorization code plus the PKCE verifier for a session.
pub async fn exchange_pkce(
    client: &reqwest::Client,
    config: &GoTrueConfig,
    auth_code: &str,
    verifier: &str,
) -> Result<TokenResponse> {
    let body = serde_json::json!({ "auth_code": auth_code, "code_verifier": verifier });
    post_grant(client, config, "pkce", body).await
}

/// Look up the user an access token belongs to.
pub async fn get_user(
    client: &reqwest::Client,
    config: &GoTrueConfig,
    access_token: &str,
) -> Result<User> {
    let response = client
        .get(config.endpoint(USER_PATH)?)
        .header(API_KEY_HEADER, config.anon_key.expose().as_str())
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| Error::Http(format!("user request failed: {e}")))?;

    let response = check_status(response, "user lookup").await?;
    response
        .json::<User>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid user response: {e}")))
}

/// Revoke the session server-side.
pub async fn logout(
    client: &reqwest::Client,
    config: &GoTrueConfig,
    access_token: &str,
) -> Result<()> {
    let response = client
        .post(config.endpoint(LOGOUT_PATH)?)
        .header(API_KEY_HEADER, config.anon_key.expose().as_str())
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| Error::Http(format!("logout request failed: {e}")))?;

    // Already-invalid sessions count as logged out
    if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND) {
        return Ok(());
    }
    check_status(response, "logout").await?;
    Ok(())
}

fn grant_url(config: &GoTrueConfig, grant_type: &str) -> Result<Url> {
    let mut url = config.endpoint(TOKEN_PATH)?;
    url.query_pairs_mut().append_pair("grant_type", grant_type);
    Ok(url)
}

async fn post_grant(
    client: &reqwest::Client,
    config: &GoTrueConfig,
    grant_type: &str,
    body: serde_json::Value,
) -> Result<TokenResponse> {
    let response = client
        .post(grant_url(config, grant_type)?)
        .header(API_KEY_HEADER, config.anon_key.expose().as_str())
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::Http(format!("{grant_type} grant request failed: {e}")))?;

    let response = check_status(response, grant_type).await?;
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid {grant_type} response: {e}")))
}

async fn check_status(response: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));

    if matches!(
        status,
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
    ) {
        return Err(Error::InvalidCredentials(format!(
            "{operation} rejected ({status}): {body}"
        )));
    }
    Err(Error::TokenExchange(format!(
        "{operation} returned {status}: {body}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGoTrue;

    #[test]
    fn token_response_deserializes_gotrue_shape() {
        let json = r#"{
            "access_token": "at_abc",
            "refresh_token": "rt_def",
            "token_type": "bearer",
            "expires_in": 3600,
            "expires_at": 1900000000,
            "user": {"id": "user-1", "email": "a@example.com", "role": "authenticated"}
        }"#;
        let session = serde_json::from_str::<TokenResponse>(json)
            .unwrap()
            .into_session();
        assert_eq!(session.access_token, "at_abc");
        assert_eq!(session.expires_at, Some(1_900_000_000));
        assert_eq!(session.user_id(), Some("user-1"));
    }

    #[test]
    fn token_response_debug_is_redacted() {
        let json = r#"{"access_token":"at_secret","refresh_token":"rt_secret"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        let debug = format!("{token:?}");
        assert!(!debug.contains("at_secret"));
        assert!(!debug.contains("rt_secret"));
    }

    #[tokio::test]
    async fn refresh_returns_new_tokens() {
        let mock = MockGoTrue::start().await;
        let token = refresh_token(&reqwest::Client::new(), &mock.config, "rt_valid")
            .await
            .unwrap();
        assert_eq!(token.access_token, "at_refreshed");
        assert_eq!(token.refresh_token, "rt_refreshed");
        assert_eq!(mock.requests(), vec!["POST /auth/v1/token?grant_type=refresh_token"]);
        assert!(mock.all_requests_had_api_key());
    }

    #[tokio::test]
    async fn revoked_refresh_token_is_invalid_credentials() {
        let mock = MockGoTrue::start().await;
        let result = refresh_token(&reqwest::Client::new(), &mock.config, "rt_revoked").await;
        assert!(matches!(result, Err(Error::InvalidCredentials(_))));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let mock = MockGoTrue::start().await;
        let result = refresh_token(&reqwest::Client::new(), &mock.config, "rt_flaky").await;
        assert!(matches!(result, Err(Error::TokenExchange(_))));
    }

    #[tokio::test]
    async fn unreachable_server_is_http_error() {
        let mock = MockGoTrue::start().await;
        let config = mock.config.clone();
        drop(mock);
        // Give the aborted server a moment to release the port
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let result = refresh_token(&reqwest::Client::new(), &config, "rt_valid").await;
        assert!(matches!(result, Err(Error::Http(_))));
    }

    #[tokio::test]
    async fn pkce_exchange_sends_code_and_verifier() {
        let mock = MockGoTrue::start().await;
        let token = exchange_pkce(&reqwest::Client::new(), &mock.config, "good-code", "verifier-1")
            .await
            .unwrap();
        assert_eq!(token.access_token, "at_pkce");
        assert_eq!(mock.last_verifier().as_deref(), Some("verifier-1"));
    }

    #[tokio::test]
    async fn user_lookup_requires_valid_token() {
        let mock = MockGoTrue::start().await;
        let client = reqwest::Client::new();
        let user = get_user(&client, &mock.config, "at_implicit").await.unwrap();
        assert_eq!(user.id, "user-implicit");
        assert!(matches!(
            get_user(&client, &mock.config, "at_forged").await,
            Err(Error::InvalidCredentials(_))
        ));
    }
}
