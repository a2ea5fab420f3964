//! GoTrue-backed `AuthProvider`

use std::sync::{Mutex as StdMutex, PoisonError};

use auth_provider::{
    AuthChangeEvent, AuthChangeHandler, AuthChangeKind, AuthListeners, AuthProvider,
    AuthSubscription, ProviderFuture, Session,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::callback::{CallbackGrant, parse_callback};
use crate::config::GoTrueConfig;
use crate::error::{Error, Result};
use crate::token;

/// Client for a GoTrue-compatible auth server.
///
/// Holds the current session in memory; persistence is the coordinator's
/// job, driven by the events this client emits.
pub struct GoTrueClient {
    config: GoTrueConfig,
    http: reqwest::Client,
    listeners: AuthListeners,
    current: Mutex<Option<Session>>,
    /// Verifier of the most recent `sign_in_with_provider`, cleared once a
    /// callback code has been exchanged with it
    pending_verifier: StdMutex<Option<String>>,
}

impl GoTrueClient {
    pub fn new(config: GoTrueConfig) -> Self {
        Self::with_http_client(config, reqwest::Client::new())
    }

    pub fn with_http_client(config: GoTrueConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            listeners: AuthListeners::new(),
            current: Mutex::new(None),
            pending_verifier: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &GoTrueConfig {
        &self.config
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.current.lock().await.clone()
    }

    pub(crate) fn remember_verifier(&self, verifier: String) {
        *self
            .pending_verifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(verifier);
    }

    fn pending_verifier(&self) -> Option<String> {
        self.pending_verifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clear the pending verifier unless a newer sign-in replaced it.
    fn consume_verifier(&self, used: &str) {
        let mut pending = self
            .pending_verifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if pending.as_deref() == Some(used) {
            pending.take();
        }
    }

    /// Make `session` current and announce it.
    async fn adopt(&self, session: Session, kind: AuthChangeKind) -> Session {
        *self.current.lock().await = Some(session.clone());
        self.listeners
            .emit(&AuthChangeEvent::new(kind, Some(session.clone())));
        session
    }

    async fn refresh(&self, session: &Session) -> Result<Session> {
        let mut refreshed =
            token::refresh_token(&self.http, &self.config, &session.refresh_token)
                .await?
                .into_session();
        if refreshed.user.is_none() {
            refreshed.user = session.user.clone();
        }
        Ok(refreshed)
    }

    /// Refresh the current session if it expires within the configured
    /// threshold. Returns the new session when a refresh happened.
    pub async fn refresh_if_expiring(&self) -> Result<Option<Session>> {
        let Some(current) = self.current_session().await else {
            return Ok(None);
        };
        if !current.expires_within(self.config.refresh_threshold) {
            return Ok(None);
        }
        debug!(user_id = ?current.user_id(), "session expiring, refreshing");
        let refreshed = self.refresh(&current).await?;
        Ok(Some(self.adopt(refreshed, AuthChangeKind::TokenRefreshed).await))
    }

    /// Forget the current session locally and emit `SignedOut`.
    pub(crate) async fn drop_session(&self) {
        self.current.lock().await.take();
        self.listeners.emit(&AuthChangeEvent::signed_out());
    }

    /// Revoke the current session on the server (best effort) and emit
    /// `SignedOut`.
    pub async fn sign_out(&self) {
        let previous = self.current_session().await;
        if let Some(session) = previous {
            if let Err(e) = token::logout(&self.http, &self.config, &session.access_token).await {
                warn!(error = %e, "server-side logout failed, clearing local session anyway");
            }
        }
        self.drop_session().await;
        info!("signed out");
    }

    async fn session_from_callback(&self, url: &Url) -> Result<(Session, AuthChangeKind)> {
        let callback = parse_callback(url)?;
        let session = match callback.grant {
            CallbackGrant::Implicit {
                access_token,
                refresh_token,
                expires_in,
                token_type,
            } => {
                let user = token::get_user(&self.http, &self.config, &access_token).await?;
                let mut session =
                    Session::from_tokens(access_token, refresh_token, expires_in, Some(user));
                if let Some(token_type) = token_type {
                    session.token_type = token_type;
                }
                session
            }
            CallbackGrant::Code(code) => {
                let verifier = self.pending_verifier().ok_or_else(|| {
                    Error::Callback("authorization code without a pending sign-in".into())
                })?;
                // A failed exchange keeps the verifier for the real redirect
                let session = token::exchange_pkce(&self.http, &self.config, &code, &verifier)
                    .await?
                    .into_session();
                self.consume_verifier(&verifier);
                session
            }
        };
        let kind = if callback.recovery {
            AuthChangeKind::PasswordRecovery
        } else {
            AuthChangeKind::SignedIn
        };
        Ok((session, kind))
    }
}

#[cfg(test)]
impl GoTrueClient {
    pub(crate) async fn set_current(&self, session: Option<Session>) {
        *self.current.lock().await = session;
    }
}

impl AuthProvider for GoTrueClient {
    fn id(&self) -> &str {
        "gotrue"
    }

    fn on_auth_state_change(&self, handler: AuthChangeHandler) -> AuthSubscription {
        self.listeners.subscribe(handler)
    }

    fn recover_session<'a>(&'a self, persisted: &'a str) -> ProviderFuture<'a, Session> {
        Box::pin(async move {
            let stored = Session::from_persisted(persisted)?;
            let session = if stored.expires_within(self.config.refresh_threshold) {
                debug!(user_id = ?stored.user_id(), "persisted session expiring, refreshing");
                self.refresh(&stored).await?
            } else {
                stored
            };
            info!(user_id = ?session.user_id(), "session recovered");
            Ok(self.adopt(session, AuthChangeKind::SignedIn).await)
        })
    }

    fn complete_from_callback_url<'a>(&'a self, url: &'a Url) -> ProviderFuture<'a, Session> {
        Box::pin(async move {
            let (session, kind) = self.session_from_callback(url).await?;
            info!(
                user_id = ?session.user_id(),
                kind = kind.label(),
                "session completed from callback"
            );
            Ok(self.adopt(session, kind).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGoTrue;
    use auth_provider::{ProviderError, User, unix_now_secs};
    use std::sync::Arc;

    type Recorded = Arc<StdMutex<Vec<AuthChangeEvent>>>;

    fn record_events(client: &GoTrueClient) -> (AuthSubscription, Recorded) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = client.on_auth_state_change(Arc::new(move |e: &AuthChangeEvent| {
            sink.lock().unwrap().push(e.clone());
        }));
        (subscription, seen)
    }

    fn stored_session(refresh_token: &str, expires_at: u64) -> Session {
        let mut session = Session::from_tokens(
            "at_stored".into(),
            refresh_token.into(),
            None,
            Some(User {
                id: "user-stored".into(),
                email: None,
            }),
        );
        session.expires_at = Some(expires_at);
        session
    }

    #[tokio::test]
    async fn fresh_session_recovers_without_network() {
        let mock = MockGoTrue::start().await;
        let client = GoTrueClient::new(mock.config.clone());
        let (_sub, seen) = record_events(&client);

        let stored = stored_session("rt_valid", unix_now_secs() + 3600);
        let session = client.recover_session(&stored.to_persisted()).await.unwrap();

        assert_eq!(session, stored);
        assert!(mock.requests().is_empty());
        assert_eq!(client.current_session().await, Some(stored));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, AuthChangeKind::SignedIn);
    }

    #[tokio::test]
    async fn expiring_session_is_refreshed_on_recovery() {
        let mock = MockGoTrue::start().await;
        let client = GoTrueClient::new(mock.config.clone());

        let stored = stored_session("rt_valid", unix_now_secs() + 10);
        let session = client.recover_session(&stored.to_persisted()).await.unwrap();

        assert_eq!(session.access_token, "at_refreshed");
        // The mock omits the user on refresh; the stored one is kept
        assert_eq!(session.user_id(), Some("user-stored"));
    }

    #[tokio::test]
    async fn revoked_session_is_rejected_without_events() {
        let mock = MockGoTrue::start().await;
        let client = GoTrueClient::new(mock.config.clone());
        let (_sub, seen) = record_events(&client);

        let stored = stored_session("rt_revoked", unix_now_secs() - 60);
        let err = client
            .recover_session(&stored.to_persisted())
            .await
            .unwrap_err();

        assert!(err.is_rejection(), "{err}");
        assert!(seen.lock().unwrap().is_empty());
        assert!(client.current_session().await.is_none());
    }

    #[tokio::test]
    async fn failing_refresh_is_transport_error() {
        let mock = MockGoTrue::start().await;
        let client = GoTrueClient::new(mock.config.clone());

        let stored = stored_session("rt_flaky", unix_now_secs());
        let err = client
            .recover_session(&stored.to_persisted())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }

    #[tokio::test]
    async fn malformed_record_is_rejected() {
        let mock = MockGoTrue::start().await;
        let client = GoTrueClient::new(mock.config.clone());
        let err = client.recover_session("{not json").await.unwrap_err();
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn implicit_callback_fetches_user() {
        let mock = MockGoTrue::start().await;
        let client = GoTrueClient::new(mock.config.clone());
        let (_sub, seen) = record_events(&client);

        let url = Url::parse(concat!(
            "io.example.app://login-callback/",
            "#access_token=at_implicit&refresh_token=rt_implicit&expires_in=3600",
        ))
        .unwrap();
        let session = client.complete_from_callback_url(&url).await.unwrap();

        assert_eq!(session.user_id(), Some("user-implicit"));
        assert_eq!(session.refresh_token, "rt_implicit");
        assert_eq!(mock.requests(), vec!["GET /auth/v1/user"]);
        assert_eq!(seen.lock().unwrap()[0].kind, AuthChangeKind::SignedIn);
    }

    #[tokio::test]
    async fn recovery_callback_emits_password_recovery() {
        let mock = MockGoTrue::start().await;
        let client = GoTrueClient::new(mock.config.clone());
        let (_sub, seen) = record_events(&client);

        let url = Url::parse(concat!(
            "io.example.app://login-callback/",
            "#access_token=at_implicit&refresh_token=rt&type=recovery",
        ))
        .unwrap();
        client.complete_from_callback_url(&url).await.unwrap();
        assert_eq!(
            seen.lock().unwrap()[0].kind,
            AuthChangeKind::PasswordRecovery
        );
    }

    #[tokio::test]
    async fn error_callback_is_rejected() {
        let mock = MockGoTrue::start().await;
        let client = GoTrueClient::new(mock.config.clone());
        let url = Url::parse("io.example.app://login-callback/#error=access_denied").unwrap();
        let err = client.complete_from_callback_url(&url).await.unwrap_err();
        assert!(err.is_rejection());
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn code_without_pending_sign_in_is_rejected() {
        let mock = MockGoTrue::start().await;
        let client = GoTrueClient::new(mock.config.clone());
        let url = Url::parse("http://127.0.0.1:9876/callback?code=good-code").unwrap();
        let err = client.complete_from_callback_url(&url).await.unwrap_err();
        assert!(err.is_rejection());
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn code_is_exchanged_with_pending_verifier_once() {
        let mock = MockGoTrue::start().await;
        let client = GoTrueClient::new(mock.config.clone());
        client.remember_verifier("verifier-xyz".into());

        let url = Url::parse("http://127.0.0.1:9876/callback?code=good-code").unwrap();
        let session = client.complete_from_callback_url(&url).await.unwrap();
        assert_eq!(session.access_token, "at_pkce");
        assert_eq!(mock.last_verifier().as_deref(), Some("verifier-xyz"));

        // Replayed link: verifier already consumed
        assert!(
            client
                .complete_from_callback_url(&url)
                .await
                .unwrap_err()
                .is_rejection()
        );
    }

    #[tokio::test]
    async fn rejected_code_keeps_pending_verifier() {
        let mock = MockGoTrue::start().await;
        let client = GoTrueClient::new(mock.config.clone());
        client.remember_verifier("verifier-xyz".into());

        let junk = Url::parse("http://127.0.0.1:9876/callback?code=junk").unwrap();
        let err = client.complete_from_callback_url(&junk).await.unwrap_err();
        assert!(err.is_rejection());

        let url = Url::parse("http://127.0.0.1:9876/callback?code=good-code").unwrap();
        let session = client.complete_from_callback_url(&url).await.unwrap();
        assert_eq!(session.access_token, "at_pkce");
        assert_eq!(mock.last_verifier().as_deref(), Some("verifier-xyz"));
    }

    #[test]
    fn newer_sign_in_verifier_survives_older_exchange() {
        let client = GoTrueClient::new(GoTrueConfig::new(
            Url::parse("https://project.example.co").unwrap(),
            common::Secret::new("anon".into()),
        ));
        client.remember_verifier("newer".into());
        client.consume_verifier("older");
        assert_eq!(client.pending_verifier().as_deref(), Some("newer"));
        client.consume_verifier("newer");
        assert_eq!(client.pending_verifier(), None);
    }

    #[tokio::test]
    async fn sign_out_revokes_and_emits() {
        let mock = MockGoTrue::start().await;
        let client = GoTrueClient::new(mock.config.clone());
        let stored = stored_session("rt_valid", unix_now_secs() + 3600);
        client.recover_session(&stored.to_persisted()).await.unwrap();
        let (_sub, seen) = record_events(&client);

        client.sign_out().await;

        assert!(client.current_session().await.is_none());
        assert_eq!(mock.requests(), vec!["POST /auth/v1/logout"]);
        assert_eq!(seen.lock().unwrap()[0].kind, AuthChangeKind::SignedOut);
    }

    #[tokio::test]
    async fn refresh_if_expiring_only_touches_expiring_sessions() {
        let mock = MockGoTrue::start().await;
        let client = GoTrueClient::new(mock.config.clone());
        assert_eq!(client.refresh_if_expiring().await, Ok(None));

        let fresh = stored_session("rt_valid", unix_now_secs() + 3600);
        client.recover_session(&fresh.to_persisted()).await.unwrap();
        assert_eq!(client.refresh_if_expiring().await, Ok(None));
        assert!(mock.requests().is_empty());

        let (_sub, seen) = record_events(&client);
        client
            .set_current(Some(stored_session("rt_valid", unix_now_secs() + 5)))
            .await;
        let refreshed = client.refresh_if_expiring().await.unwrap().unwrap();
        assert_eq!(refreshed.access_token, "at_refreshed");
        assert_eq!(
            seen.lock().unwrap()[0].kind,
            AuthChangeKind::TokenRefreshed
        );
    }
}
