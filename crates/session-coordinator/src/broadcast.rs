//! Fan-out of auth-change events to external subscribers
//!
//! Each subscriber owns an unbounded queue, so a slow subscriber never holds
//! up the others and never loses events. Subscribers whose stream has been
//! dropped are pruned on the next publish. Closing drops every queue sender;
//! later publishes are silently discarded and open streams end once drained.

use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use auth_provider::AuthChangeEvent;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

type Subscribers = Vec<mpsc::UnboundedSender<AuthChangeEvent>>;

pub struct AuthBroadcast {
    /// `None` once closed
    subscribers: Mutex<Option<Subscribers>>,
}

impl AuthBroadcast {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Some(Vec::new())),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Option<Subscribers>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver an event to every current subscriber. Returns how many
    /// subscribers it reached; zero when closed or nobody is listening.
    pub fn publish(&self, event: AuthChangeEvent) -> usize {
        let mut subscribers = self.subscribers();
        let Some(senders) = subscribers.as_mut() else {
            trace!(kind = event.kind.label(), "broadcast closed, dropping auth event");
            return 0;
        };
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        senders.len()
    }

    /// New subscriber that sees every event published from now on. On a
    /// closed broadcast the stream is already finished.
    pub fn subscribe(&self) -> AuthChangeStream {
        let mut subscribers = self.subscribers();
        match subscribers.as_mut() {
            Some(senders) => {
                let (tx, rx) = mpsc::unbounded_channel();
                senders.push(tx);
                AuthChangeStream::from_receiver(rx)
            }
            None => AuthChangeStream::closed(),
        }
    }

    pub fn close(&self) {
        if self.subscribers().take().is_some() {
            debug!("auth change broadcast closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.subscribers().is_none()
    }

    /// Subscribers whose stream is still alive.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers()
            .as_ref()
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }
}

impl Default for AuthBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream of auth-change events for one subscriber.
pub struct AuthChangeStream {
    inner: BoxStream<'static, AuthChangeEvent>,
}

impl AuthChangeStream {
    fn from_receiver(rx: mpsc::UnboundedReceiver<AuthChangeEvent>) -> Self {
        let inner =
            stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) })
                .boxed();
        Self { inner }
    }

    fn closed() -> Self {
        Self {
            inner: stream::empty().boxed(),
        }
    }
}

impl Stream for AuthChangeStream {
    type Item = AuthChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
