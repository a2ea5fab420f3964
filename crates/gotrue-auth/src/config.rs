//! GoTrue client configuration

use std::time::Duration;

use common::Secret;
use url::Url;

use crate::constants::DEFAULT_REFRESH_THRESHOLD;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct GoTrueConfig {
    /// Project URL; endpoint paths are appended to it
    pub url: Url,
    /// Public project key sent as `apikey` on every request
    pub anon_key: Secret<String>,
    /// Sessions expiring within this margin are refreshed before use
    pub refresh_threshold: Duration,
}

impl GoTrueConfig {
    pub fn new(url: Url, anon_key: Secret<String>) -> Self {
        Self {
            url,
            anon_key,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
        }
    }

    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Absolute URL of an endpoint path, keeping any path prefix on the
    /// project URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path}"))
            .map_err(|e| Error::Config(format!("invalid endpoint URL for {path}: {e}")))
    }
}
