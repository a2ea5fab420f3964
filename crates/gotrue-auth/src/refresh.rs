//! Proactive background token refresh
//!
//! Spawns a periodic task that refreshes the current session shortly before
//! it expires, so callers rarely hold an expired access token. Each refresh
//! emits `TokenRefreshed`, which the coordinator persists.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::client::GoTrueClient;
use crate::error::Error;

/// Spawn a background task that refreshes the session every `interval`
/// when it expires within the client's refresh threshold.
///
/// A rejected refresh token signs the user out; transient errors leave the
/// session alone until the next cycle.
pub fn spawn_refresh_task(
    client: Arc<GoTrueClient>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick; startup recovery already refreshed
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&client).await;
        }
    })
}

async fn refresh_cycle(client: &GoTrueClient) {
    match client.refresh_if_expiring().await {
        Ok(Some(session)) => {
            info!(user_id = ?session.user_id(), "background token refresh succeeded");
        }
        Ok(None) => debug!("no session due for refresh"),
        Err(Error::InvalidCredentials(msg)) => {
            warn!(error = %msg, "refresh token rejected, signing out");
            client.drop_session().await;
        }
        Err(e) => {
            warn!(error = %e, "background refresh failed (transient), will retry next cycle");
        }
    }
}
