//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! The verifier stays with the client until the callback arrives; the S256
//! challenge goes into the authorize URL so the server can check that the
//! party exchanging the code is the one that started the flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::GoTrueConfig;
use crate::constants::AUTHORIZE_PATH;
use crate::error::Result;

/// Generate a random PKCE code verifier.
///
/// 64 random bytes as URL-safe base64 without padding: 86 characters,
/// inside the 43-128 range RFC 7636 allows.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Authorize URL that sends the browser to an external identity provider
/// and back to `redirect_to` with a `code`.
pub fn build_authorize_url(
    config: &GoTrueConfig,
    provider: &str,
    redirect_to: &str,
    challenge: &str,
    scopes: Option<&str>,
) -> Result<Url> {
    let mut url = config.endpoint(AUTHORIZE_PATH)?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to)
            .append_pair("code_challenge", challenge)
            .append_pair("code_challenge_method", "s256");
        if let Some(scopes) = scopes {
            query.append_pair("scopes", scopes);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Secret;
    use std::collections::HashMap;

    #[test]
    fn verifier_is_url_safe_and_rfc_length() {
        let verifier = generate_verifier();
        assert_eq!(verifier.len(), 86);
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier must be URL-safe base64 (no padding): {verifier}"
        );
    }

    #[test]
    fn verifiers_are_unique() {
        assert_ne!(generate_verifier(), generate_verifier());
    }

    #[test]
    fn challenge_matches_known_value() {
        // SHA256("hello") = 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
        assert_eq!(
            compute_challenge("hello"),
            "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ"
        );
    }

    #[test]
    fn authorize_url_carries_flow_parameters() {
        let config = GoTrueConfig::new(
            Url::parse("https://project.example.co").unwrap(),
            Secret::new("anon".into()),
        );
        let url = build_authorize_url(
            &config,
            "github",
            "io.example.app://login-callback/",
            "challenge-value",
            Some("read:user user:email"),
        )
        .unwrap();

        assert_eq!(url.path(), "/auth/v1/authorize");
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["provider"], "github");
        assert_eq!(params["redirect_to"], "io.example.app://login-callback/");
        assert_eq!(params["code_challenge"], "challenge-value");
        assert_eq!(params["code_challenge_method"], "s256");
        assert_eq!(params["scopes"], "read:user user:email");
    }

    #[test]
    fn authorize_url_omits_scopes_when_unset() {
        let config = GoTrueConfig::new(
            Url::parse("https://project.example.co").unwrap(),
            Secret::new("anon".into()),
        );
        let url = build_authorize_url(
            &config,
            "google",
            "http://127.0.0.1:9876/callback",
            "c",
            None,
        )
        .unwrap();
        assert!(!url.query_pairs().any(|(k, _)| k == "scopes"));
    }
}
