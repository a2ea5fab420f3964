//! Loopback listener for auth-callback redirects
//!
//! The provider redirects the browser to `http://<listen_addr>/callback`.
//! Each redirect is rebuilt into a full link and pushed into the agent's
//! live link stream, where the deep-link router picks it up.
//!
//! Implicit-grant tokens arrive in the URL fragment, which browsers never
//! send to a server. A callback without a query gets a small page that
//! re-requests the same path with the fragment moved into the query.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use deep_link::LinkSender;
use tracing::{debug, warn};

use crate::metrics;

const FRAGMENT_RELAY_PAGE: &str = r#"<!doctype html>
<html><head><title>Signing in</title></head>
<body><p>Completing sign-in...</p>
<script>
if (location.hash.length > 1) {
  location.replace(location.pathname + "?" + location.hash.substring(1));
} else {
  document.body.textContent = "No sign-in response found in this link.";
}
</script></body></html>"#;

const DONE_PAGE: &str = r#"<!doctype html>
<html><head><title>Signed in</title></head>
<body><p>Sign-in response received. You can close this window.</p></body></html>"#;

#[derive(Clone)]
struct LinkListenerState {
    sender: LinkSender,
    /// Used as the link host when the request carries no Host header
    listen_addr: SocketAddr,
}

pub fn build_router(sender: LinkSender, listen_addr: SocketAddr) -> Router {
    Router::new()
        .route("/callback", get(callback_handler))
        .with_state(LinkListenerState {
            sender,
            listen_addr,
        })
}

async fn callback_handler(
    State(state): State<LinkListenerState>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let Some(query) = uri.query().filter(|q| !q.is_empty()) else {
        debug!("callback without query, serving fragment relay");
        return Html(FRAGMENT_RELAY_PAGE).into_response();
    };

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| state.listen_addr.to_string());
    let link = format!("http://{host}{}?{query}", uri.path());

    let accepted = state.sender.send_raw(&link);
    metrics::record_callback(accepted);
    if !accepted {
        warn!("link stream closed, dropping callback");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "session agent is shutting down",
        )
            .into_response();
    }

    debug!(host = %host, "callback forwarded to link stream");
    (StatusCode::OK, Html(DONE_PAGE)).into_response()
}
