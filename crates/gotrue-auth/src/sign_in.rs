//! Sign-in through an external identity provider
//!
//! Builds the PKCE authorize URL, remembers the verifier on the client and
//! hands the URL to a browser. The flow finishes when the redirect comes
//! back as a callback link.

use std::future::Future;
use std::pin::Pin;

use tracing::info;
use url::Url;

use crate::client::GoTrueClient;
use crate::error::{Error, Result};
use crate::pkce;

/// Boxed future returned by `BrowserLauncher::open`.
pub type LaunchFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Opens a URL in a browser outside this process.
pub trait BrowserLauncher: Send + Sync {
    fn open<'a>(&'a self, url: &'a Url) -> LaunchFuture<'a>;
}

/// Platform URL opener and its leading arguments
#[cfg(target_os = "macos")]
const OPENER: (&str, &[&str]) = ("open", &[]);
#[cfg(target_os = "windows")]
const OPENER: (&str, &[&str]) = ("rundll32", &["url.dll,FileProtocolHandler"]);
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const OPENER: (&str, &[&str]) = ("xdg-open", &[]);

/// Launches the platform's default browser via its URL opener.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open<'a>(&'a self, url: &'a Url) -> LaunchFuture<'a> {
        Box::pin(async move {
            let (program, args) = OPENER;
            let status = tokio::process::Command::new(program)
                .args(args)
                .arg(url.as_str())
                .status()
                .await
                .map_err(|e| Error::Browser(format!("failed to run `{program}`: {e}")))?;
            if !status.success() {
                return Err(Error::Browser(format!("`{program}` exited with {status}")));
            }
            Ok(())
        })
    }
}

impl GoTrueClient {
    /// Start an OAuth sign-in with `provider` (e.g. "github").
    ///
    /// Returns the authorize URL that was opened. A later sign-in replaces
    /// the pending verifier, so only the most recent flow can complete.
    pub async fn sign_in_with_provider(
        &self,
        provider: &str,
        redirect_to: &str,
        scopes: Option<&str>,
        launcher: &dyn BrowserLauncher,
    ) -> Result<Url> {
        let verifier = pkce::generate_verifier();
        let challenge = pkce::compute_challenge(&verifier);
        let url =
            pkce::build_authorize_url(self.config(), provider, redirect_to, &challenge, scopes)?;
        self.remember_verifier(verifier);

        info!(provider, redirect_to, "opening browser for provider sign-in");
        launcher.open(&url).await?;
        Ok(url)
    }
}
