//! Callback host filter

use url::Url;

/// Decides which incoming links are auth callbacks.
///
/// With no host configured every link matches. With a host configured only
/// links whose host is exactly that string match; everything else is left
/// for other deep-link consumers in the application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackHostFilter {
    host: Option<String>,
}

impl CallbackHostFilter {
    pub fn new(host: Option<String>) -> Self {
        Self { host }
    }

    /// Filter that accepts every link.
    pub fn any() -> Self {
        Self { host: None }
    }

    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
        }
    }

    pub fn configured_host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn matches(&self, url: &Url) -> bool {
        match &self.host {
            None => true,
            Some(host) => url.host_str() == Some(host.as_str()),
        }
    }
}
