//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The anon key is loaded from GOTRUE_ANON_KEY or `auth.anon_key_file`,
//! never stored in the TOML directly.

use common::Secret;
use serde::Deserialize;
use session_store::DEFAULT_PERSIST_KEY;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const ANON_KEY_ENV: &str = "GOTRUE_ANON_KEY";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub links: LinksConfig,
    pub control: ControlConfig,
}

/// GoTrue endpoint and session maintenance settings
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    pub url: String,
    #[serde(skip)]
    pub anon_key: Option<Secret<String>>,
    #[serde(default)]
    pub anon_key_file: Option<PathBuf>,
    /// Host of auth-callback links; omitted means every incoming link is one
    #[serde(default)]
    pub callback_host: Option<String>,
    /// Where the provider sends the browser after sign-in. Defaults to the
    /// link listener's `/callback` route.
    #[serde(default)]
    pub redirect_to: Option<String>,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: u64,
}

/// Where the session record lives
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
    #[serde(default = "default_persist_key")]
    pub persist_key: String,
}

/// Loopback listener receiving auth-callback redirects
#[derive(Debug, Deserialize)]
pub struct LinksConfig {
    pub listen_addr: SocketAddr,
}

/// Local control API
#[derive(Debug, Deserialize)]
pub struct ControlConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_refresh_threshold() -> u64 {
    300
}

fn default_persist_key() -> String {
    DEFAULT_PERSIST_KEY.to_string()
}

fn default_max_connections() -> usize {
    64
}

impl AuthConfig {
    /// Parsed GoTrue base URL; only http(s) is accepted.
    pub fn gotrue_url(&self) -> common::Result<Url> {
        let url = Url::parse(&self.url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(common::Error::Config(format!(
                "auth.url must use http or https, got scheme {other:?}"
            ))),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Anon key resolution order:
    /// 1. GOTRUE_ANON_KEY env var
    /// 2. anon_key_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        config.auth.gotrue_url()?;

        if config
            .auth
            .callback_host
            .as_deref()
            .is_some_and(|host| host.trim().is_empty())
        {
            return Err(common::Error::Config(
                "auth.callback_host must not be empty when set".into(),
            ));
        }

        if let Some(ref redirect) = config.auth.redirect_to {
            Url::parse(redirect).map_err(|e| {
                common::Error::Config(format!("auth.redirect_to is not a valid URL: {e}"))
            })?;
        }

        if config.auth.refresh_interval_secs == 0 {
            return Err(common::Error::Config(
                "refresh_interval_secs must be greater than 0".into(),
            ));
        }

        if config.control.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.storage.persist_key.is_empty() {
            return Err(common::Error::Config(
                "storage.persist_key must not be empty".into(),
            ));
        }

        // Resolve anon key: env var takes precedence over file
        if let Ok(key) = std::env::var(ANON_KEY_ENV) {
            config.auth.anon_key = Some(Secret::new(key));
        } else if let Some(ref key_file) = config.auth.anon_key_file {
            config.auth.anon_key = Secret::from_file(key_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read anon_key_file {}: {e}",
                    key_file.display()
                ))
            })?;
        }

        if config.auth.anon_key.is_none() {
            return Err(common::Error::Config(format!(
                "no anon key: set {ANON_KEY_ENV} or auth.anon_key_file"
            )));
        }

        Ok(config)
    }

    /// Redirect target handed to the provider when starting a sign-in.
    pub fn redirect_to(&self) -> String {
        self.auth
            .redirect_to
            .clone()
            .unwrap_or_else(|| format!("http://{}/callback", self.links.listen_addr))
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("session-agent.toml")
    }
}
