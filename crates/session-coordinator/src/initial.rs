//! Single-resolution cell for the session found at startup

use std::sync::Arc;

use auth_provider::Session;
use tokio::sync::watch;

use crate::error::{Error, Result};

type Outcome = Result<Option<Session>>;

/// Resolves exactly once with the recovered session, `None`, or the startup
/// failure. Later resolutions are ignored. Clones share the same cell.
#[derive(Clone)]
pub struct InitialSession {
    cell: Arc<watch::Sender<Option<Outcome>>>,
}

impl InitialSession {
    pub fn new() -> Self {
        let (cell, _) = watch::channel(None);
        Self {
            cell: Arc::new(cell),
        }
    }

    /// Store the outcome if the cell is still empty. Returns whether this
    /// call resolved it.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        self.cell.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.borrow().is_some()
    }

    /// The outcome, if already resolved.
    pub fn peek(&self) -> Option<Outcome> {
        self.cell.borrow().clone()
    }

    /// Wait until the cell is resolved.
    pub async fn wait(&self) -> Outcome {
        let mut rx = self.cell.subscribe();
        let resolved = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Disposed)?;
        (*resolved).clone().unwrap_or(Ok(None))
    }
}

impl Default for InitialSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth_provider::ProviderError;
    use std::time::Duration;

    fn session(token: &str) -> Session {
        Session::from_tokens(token.into(), format!("rt_{token}"), Some(3600), None)
    }

    #[tokio::test]
    async fn first_resolution_wins() {
        let cell = InitialSession::new();
        assert!(cell.resolve(Ok(Some(session("first")))));
        assert!(!cell.resolve(Ok(None)));
        assert!(!cell.resolve(Err(Error::Uninitialized)));

        let resolved = cell.wait().await.unwrap().unwrap();
        assert_eq!(resolved.access_token, "first");
    }

    #[tokio::test]
    async fn waiters_block_until_resolved() {
        let cell = InitialSession::new();
        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        assert!(cell.peek().is_none());

        cell.resolve(Err(Error::Provider(ProviderError::Rejected("expired".into()))));
        let outcome = waiter.await.unwrap();
        assert!(matches!(outcome, Err(Error::Provider(ref e)) if e.is_rejection()));
    }

    #[tokio::test]
    async fn concurrent_resolvers_resolve_once() {
        let cell = InitialSession::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let cell = cell.clone();
            handles.push(tokio::spawn(async move {
                cell.resolve(Ok(Some(session(&format!("t{i}")))))
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(cell.is_resolved());
    }

    #[tokio::test]
    async fn late_waiter_sees_stored_outcome() {
        let cell = InitialSession::new();
        cell.resolve(Ok(None));
        assert_eq!(cell.wait().await, Ok(None));
        assert_eq!(cell.wait().await, Ok(None));
    }
}
