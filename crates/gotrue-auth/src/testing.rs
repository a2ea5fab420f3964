//! Throwaway GoTrue server for tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use common::Secret;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use url::Url;

use crate::config::GoTrueConfig;

pub const ANON_KEY: &str = "anon-test-key";

#[derive(Default)]
struct Recorded {
    requests: Vec<String>,
    missing_api_key: bool,
    last_verifier: Option<String>,
}

type Shared = Arc<Mutex<Recorded>>;

/// Mock auth server.
///
/// Refresh tokens: `rt_revoked` -> 400, `rt_flaky` -> 500, anything else
/// succeeds. PKCE: `good-code` succeeds. User lookup accepts `at_implicit`.
pub struct MockGoTrue {
    pub config: GoTrueConfig,
    recorded: Shared,
    handle: tokio::task::JoinHandle<()>,
}

impl MockGoTrue {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Shared::default();

        let app = axum::Router::new()
            .route("/auth/v1/token", post(token))
            .route("/auth/v1/user", get(user))
            .route("/auth/v1/logout", post(logout))
            .with_state(recorded.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = GoTrueConfig::new(
            Url::parse(&format!("http://{addr}")).unwrap(),
            Secret::new(ANON_KEY.into()),
        );
        Self {
            config,
            recorded,
            handle,
        }
    }

    /// `METHOD path?query` of every request, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.recorded.lock().unwrap().requests.clone()
    }

    pub fn all_requests_had_api_key(&self) -> bool {
        !self.recorded.lock().unwrap().missing_api_key
    }

    pub fn last_verifier(&self) -> Option<String> {
        self.recorded.lock().unwrap().last_verifier.clone()
    }
}

impl Drop for MockGoTrue {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn record(state: &Shared, method: &str, uri: &Uri, headers: &HeaderMap) {
    let mut recorded = state.lock().unwrap();
    recorded.requests.push(format!("{method} {uri}"));
    if headers.get("apikey").and_then(|v| v.to_str().ok()) != Some(ANON_KEY) {
        recorded.missing_api_key = true;
    }
}

fn rejected(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "invalid_grant", "error_description": message })),
    )
        .into_response()
}

async fn token(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, "POST", &uri, &headers);
    match params.get("grant_type").map(String::as_str) {
        Some("refresh_token") => match body["refresh_token"].as_str() {
            Some("rt_revoked") => rejected("Invalid Refresh Token: Already Used"),
            Some("rt_flaky") => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            Some(_) => Json(json!({
                "access_token": "at_refreshed",
                "refresh_token": "rt_refreshed",
                "token_type": "bearer",
                "expires_in": 3600,
            }))
            .into_response(),
            None => rejected("missing refresh_token"),
        },
        Some("pkce") => {
            state.lock().unwrap().last_verifier = body["code_verifier"].as_str().map(String::from);
            if body["auth_code"].as_str() != Some("good-code") {
                return rejected("invalid flow state, no valid flow state found");
            }
            Json(json!({
                "access_token": "at_pkce",
                "refresh_token": "rt_pkce",
                "token_type": "bearer",
                "expires_in": 3600,
                "user": { "id": "user-pkce", "email": "pkce@example.com" },
            }))
            .into_response()
        }
        _ => rejected("unsupported grant_type"),
    }
}

async fn user(State(state): State<Shared>, uri: Uri, headers: HeaderMap) -> Response {
    record(&state, "GET", &uri, &headers);
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if bearer != "Bearer at_implicit" {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({ "id": "user-implicit", "email": "implicit@example.com", "aud": "authenticated" }))
        .into_response()
}

async fn logout(State(state): State<Shared>, uri: Uri, headers: HeaderMap) -> StatusCode {
    record(&state, "POST", &uri, &headers);
    StatusCode::NO_CONTENT
}
