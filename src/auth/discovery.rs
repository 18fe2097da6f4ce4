//! OpenID Connect provider discovery
//!
//! Runs once at startup: reads the issuer's discovery document, then its
//! signing keys, and freezes both into an immutable [`ProviderMetadata`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use vmgate::auth::discovery;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = discovery::http_client(Duration::from_secs(10))?;
//! let metadata = discovery::discover(
//!     &client,
//!     "https://keycloak.example.com/realms/lab",
//!     "vmgate",
//! )
//! .await?;
//! println!("{} signing keys", metadata.keys.len());
//! # Ok(())
//! # }
//! ```

use super::jwks::{Jwks, KeySet};
use super::AuthError;
use jsonwebtoken::Algorithm;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Path of the discovery document relative to the issuer
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// The parts of the discovery document the verifier needs
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

impl DiscoveryDocument {
    /// Algorithms the provider signs tokens with.
    ///
    /// Names this verifier cannot check (e.g. `none`) are dropped. A provider
    /// that advertises nothing is taken to sign with RS256 only.
    pub fn signing_algorithms(&self) -> Vec<Algorithm> {
        if self.id_token_signing_alg_values_supported.is_empty() {
            return vec![Algorithm::RS256];
        }

        self.id_token_signing_alg_values_supported
            .iter()
            .filter_map(|name| match Algorithm::from_str(name) {
                Ok(algorithm) => Some(algorithm),
                Err(_) => {
                    warn!(algorithm = %name, "Ignoring unsupported advertised signing algorithm");
                    None
                }
            })
            .collect()
    }
}

/// Issuer, audience and signing keys of the identity provider.
///
/// Never mutated after construction; key rotation builds a new value.
#[derive(Debug)]
pub struct ProviderMetadata {
    /// Issuer exactly as the provider reports it; tokens must carry this `iss`
    pub issuer: String,
    /// Where the keys came from, if they were fetched
    pub jwks_uri: Option<String>,
    /// Expected `aud` (the client identifier)
    pub audience: String,
    /// Header algorithms accepted; empty means any algorithm the key allows
    pub algorithms: Vec<Algorithm>,
    pub keys: KeySet,
}

impl ProviderMetadata {
    /// Build metadata from an already known key set, without network I/O
    pub fn from_parts(issuer: &str, audience: &str, jwks: &Jwks) -> Result<Self, AuthError> {
        Ok(Self {
            issuer: issuer.to_string(),
            jwks_uri: None,
            audience: audience.to_string(),
            algorithms: Vec::new(),
            keys: KeySet::from_jwks(jwks)?,
        })
    }

    /// Restrict token algorithms to `algorithms`
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    /// Whether tokens signed with `algorithm` may be accepted at all
    pub fn allows(&self, algorithm: Algorithm) -> bool {
        self.algorithms.is_empty() || self.algorithms.contains(&algorithm)
    }

    /// Same provider, new key set
    pub(crate) fn with_keys(&self, keys: KeySet) -> Self {
        Self {
            issuer: self.issuer.clone(),
            jwks_uri: self.jwks_uri.clone(),
            audience: self.audience.clone(),
            algorithms: self.algorithms.clone(),
            keys,
        }
    }
}

/// HTTP client used for discovery and key fetches, bounded by `timeout`
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, AuthError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| AuthError::DiscoveryFailed(format!("Failed to build HTTP client: {}", e)))
}

fn discovery_url(issuer_url: &str) -> String {
    format!("{}{}", issuer_url.trim_end_matches('/'), DISCOVERY_PATH)
}

fn same_issuer(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

async fn fetch_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, AuthError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AuthError::DiscoveryFailed(format!("GET {}: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(AuthError::DiscoveryFailed(format!(
            "GET {}: HTTP {}: {}",
            url,
            response.status(),
            response.status().canonical_reason().unwrap_or("Unknown")
        )));
    }

    response
        .json()
        .await
        .map_err(|e| AuthError::DiscoveryFailed(format!("GET {}: {}", url, e)))
}

/// Fetch the discovery document of `issuer_url`
pub async fn fetch_document(
    client: &reqwest::Client,
    issuer_url: &str,
) -> Result<DiscoveryDocument, AuthError> {
    let document: DiscoveryDocument = fetch_json(client, &discovery_url(issuer_url)).await?;

    if !same_issuer(&document.issuer, issuer_url) {
        return Err(AuthError::DiscoveryFailed(format!(
            "issuer mismatch: configured '{}', provider reports '{}'",
            issuer_url, document.issuer
        )));
    }

    Ok(document)
}

/// Fetch a JWK set
pub async fn fetch_jwks(client: &reqwest::Client, jwks_uri: &str) -> Result<Jwks, AuthError> {
    fetch_json(client, jwks_uri).await
}

/// Discover the provider at `issuer_url` and load its signing keys
pub async fn discover(
    client: &reqwest::Client,
    issuer_url: &str,
    audience: &str,
) -> Result<ProviderMetadata, AuthError> {
    let document = fetch_document(client, issuer_url).await?;
    debug!(issuer = %document.issuer, jwks_uri = %document.jwks_uri, "Fetched discovery document");

    let algorithms = document.signing_algorithms();
    if algorithms.is_empty() {
        return Err(AuthError::DiscoveryFailed(
            "provider advertises no supported signing algorithm".into(),
        ));
    }

    let jwks = fetch_jwks(client, &document.jwks_uri).await?;
    let keys = KeySet::from_jwks(&jwks)?;

    info!(
        issuer = %document.issuer,
        keys = keys.len(),
        algorithms = ?algorithms,
        "Identity provider discovered"
    );

    Ok(ProviderMetadata {
        issuer: document.issuer,
        jwks_uri: Some(document.jwks_uri),
        audience: audience.to_string(),
        algorithms,
        keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_url() {
        assert_eq!(
            discovery_url("https://idp.example.com/realms/lab/"),
            "https://idp.example.com/realms/lab/.well-known/openid-configuration"
        );
    }

    fn document(advertised: &[&str]) -> DiscoveryDocument {
        DiscoveryDocument {
            issuer: "https://idp.example.com".into(),
            jwks_uri: "https://idp.example.com/certs".into(),
            id_token_signing_alg_values_supported: advertised.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_signing_algorithms_default_to_rs256() {
        assert_eq!(document(&[]).signing_algorithms(), vec![Algorithm::RS256]);
    }

    #[test]
    fn test_signing_algorithms_drop_unknown_names() {
        assert_eq!(
            document(&["RS256", "none", "ES256"]).signing_algorithms(),
            vec![Algorithm::RS256, Algorithm::ES256]
        );
        assert!(document(&["none"]).signing_algorithms().is_empty());
    }

    #[test]
    fn test_same_issuer_ignores_trailing_slash() {
        assert!(same_issuer("https://idp/realms/a/", "https://idp/realms/a"));
        assert!(!same_issuer("https://idp/realms/a", "https://idp/realms/b"));
    }
}
