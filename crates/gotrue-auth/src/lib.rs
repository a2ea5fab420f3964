//! GoTrue authentication provider
//!
//! Implements `AuthProvider` against a GoTrue-compatible auth server. This
//! crate has no dependency on the coordinator; it owns the protocol side:
//!
//! 1. `GoTrueClient::sign_in_with_provider()` generates a PKCE pair, opens
//!    the browser on the authorize endpoint and remembers the verifier
//! 2. The browser redirects back with a callback link; the coordinator hands
//!    it to `complete_from_callback_url()`, which exchanges the `code` (or
//!    adopts implicit-grant tokens from the fragment)
//! 3. `recover_session()` rebuilds a session from its persisted form,
//!    refreshing it first when it is about to expire
//! 4. `refresh::spawn_refresh_task()` keeps the current session fresh and
//!    emits `TokenRefreshed`
//! 5. `sign_out()` revokes the session and emits `SignedOut`

pub mod callback;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod pkce;
pub mod refresh;
pub mod sign_in;
pub mod token;

#[cfg(test)]
mod testing;

pub use callback::{Callback, CallbackGrant, parse_callback};
pub use client::GoTrueClient;
pub use config::GoTrueConfig;
pub use error::{Error, Result};
pub use refresh::spawn_refresh_task;
pub use sign_in::{BrowserLauncher, LaunchFuture, SystemBrowser};
pub use token::TokenResponse;
