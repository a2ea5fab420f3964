//! Link source contract and in-process implementations

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::PoisonError;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

/// Errors reported by a link source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The platform link-capture facility failed
    #[error("link platform error: {0}")]
    Platform(String),

    /// A link arrived but could not be parsed as a URL
    #[error("malformed link: {0}")]
    Format(String),
}

pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Boxed future returned by `LinkSource::initial_link`.
pub type LinkFuture<'a, T> = Pin<Box<dyn Future<Output = LinkResult<T>> + Send + 'a>>;

/// Live stream of incoming links. Items may be empty links or errors; neither
/// ends the stream.
pub type LinkStream = BoxStream<'static, LinkResult<Option<Url>>>;

/// Platform facility that captures deep links.
pub trait LinkSource: Send + Sync {
    /// The link the process was launched with, if any.
    ///
    /// Platforms may misbehave if this is queried more than once per
    /// process; `DeepLinkRouter` guarantees it never does.
    fn initial_link(&self) -> LinkFuture<'_, Option<Url>>;

    /// Links arriving while the process runs. `None` on platforms that have
    /// no such concept (e.g. a web runtime).
    fn live_links(&self) -> Option<LinkStream>;
}

/// Parse a raw link string into a URL.
pub fn parse_link(raw: &str) -> LinkResult<Url> {
    Url::parse(raw.trim()).map_err(|e| LinkError::Format(format!("{e}")))
}

/// Link source for platforms without link capture.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLinkSource;

impl LinkSource for NoLinkSource {
    fn initial_link(&self) -> LinkFuture<'_, Option<Url>> {
        Box::pin(async { Ok(None) })
    }

    fn live_links(&self) -> Option<LinkStream> {
        None
    }
}

/// Link source fed from inside the process.
///
/// The initial link is fixed at construction (typically taken from the
/// command line); live links are pushed through the paired `LinkSender`.
/// The live stream can be taken once.
pub struct ChannelLinkSource {
    initial: Option<String>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<LinkResult<Option<Url>>>>>,
}

impl ChannelLinkSource {
    pub fn new(initial: Option<String>) -> (Self, LinkSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            initial,
            receiver: Mutex::new(Some(rx)),
        };
        (source, LinkSender { tx })
    }
}

impl LinkSource for ChannelLinkSource {
    fn initial_link(&self) -> LinkFuture<'_, Option<Url>> {
        Box::pin(async move { self.initial.as_deref().map(parse_link).transpose() })
    }

    fn live_links(&self) -> Option<LinkStream> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match receiver {
            Some(rx) => Some(
                stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
                    .boxed(),
            ),
            None => {
                debug!("live link stream already taken");
                Some(stream::empty().boxed())
            }
        }
    }
}

/// Producer half of a `ChannelLinkSource`.
#[derive(Clone)]
pub struct LinkSender {
    tx: mpsc::UnboundedSender<LinkResult<Option<Url>>>,
}

impl LinkSender {
    /// Push a raw link; unparsable links are delivered as `LinkError::Format`.
    /// Returns false once the stream consumer has gone away.
    pub fn send_raw(&self, raw: &str) -> bool {
        self.tx.send(parse_link(raw).map(Some)).is_ok()
    }

    pub fn send(&self, url: Url) -> bool {
        self.tx.send(Ok(Some(url))).is_ok()
    }

    pub fn send_error(&self, error: LinkError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_link_source_is_empty() {
        let source = NoLinkSource;
        assert_eq!(source.initial_link().await, Ok(None));
        assert!(source.live_links().is_none());
    }

    #[tokio::test]
    async fn initial_link_is_parsed() {
        let (source, _tx) =
            ChannelLinkSource::new(Some("io.example.app://login-callback/?code=abc".into()));
        let url = source.initial_link().await.unwrap().unwrap();
        assert_eq!(url.host_str(), Some("login-callback"));
    }

    #[tokio::test]
    async fn malformed_initial_link_is_format_error() {
        let (source, _tx) = ChannelLinkSource::new(Some("::not a link::".into()));
        assert!(matches!(
            source.initial_link().await,
            Err(LinkError::Format(_))
        ));
    }

    #[tokio::test]
    async fn live_stream_yields_links_and_errors_in_order() {
        let (source, tx) = ChannelLinkSource::new(None);
        let mut links = source.live_links().unwrap();

        assert!(tx.send_raw("io.example.app://login-callback/?code=1"));
        assert!(tx.send_raw("not a url"));
        assert!(tx.send_error(LinkError::Platform("channel reset".into())));
        drop(tx);

        let first = links.next().await.unwrap().unwrap().unwrap();
        assert_eq!(first.query(), Some("code=1"));
        assert!(matches!(links.next().await, Some(Err(LinkError::Format(_)))));
        assert!(matches!(links.next().await, Some(Err(LinkError::Platform(_)))));
        assert!(links.next().await.is_none());
    }

    #[tokio::test]
    async fn live_stream_can_only_be_taken_once() {
        let (source, tx) = ChannelLinkSource::new(None);
        let _first = source.live_links().unwrap();
        let mut second = source.live_links().unwrap();
        tx.send_raw("io.example.app://login-callback/");
        assert!(second.next().await.is_none());
    }
}
