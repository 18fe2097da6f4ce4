//! Bearer token verification
//!
//! [`TokenVerifier`] holds the current provider snapshot. Verification reads
//! the snapshot once and runs against it, so a key rotation swapping in a new
//! snapshot is never seen half-applied.

use super::discovery::{self, ProviderMetadata};
use super::jwks::KeySet;
use super::{extract_bearer, AuthError, VerifiedClaims};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Validation};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default clock skew tolerance in seconds
pub const DEFAULT_LEEWAY_SECS: u64 = 60;

/// Token verifier
///
/// # Example
///
/// ```
/// use vmgate::auth::discovery::ProviderMetadata;
/// use vmgate::auth::jwks::Jwks;
/// use vmgate::auth::{AuthError, TokenVerifier};
///
/// let verifier = TokenVerifier::unready();
/// assert!(matches!(verifier.verify("Bearer x"), Err(AuthError::VerifierNotReady)));
///
/// let jwks: Jwks = serde_json::from_str(
///     r#"{"keys": [{"kty": "oct", "kid": "k1", "k": "c2VjcmV0LXNpZ25pbmcta2V5"}]}"#,
/// ).unwrap();
/// verifier.install(ProviderMetadata::from_parts("https://idp.example.com", "vmgate", &jwks).unwrap());
/// assert!(verifier.is_ready());
/// ```
pub struct TokenVerifier {
    snapshot: RwLock<Option<Arc<ProviderMetadata>>>,
    leeway: u64,
}

impl TokenVerifier {
    /// Verifier whose discovery has not completed; every call fails with
    /// [`AuthError::VerifierNotReady`] until [`install`](Self::install)
    pub fn unready() -> Self {
        Self {
            snapshot: RwLock::new(None),
            leeway: DEFAULT_LEEWAY_SECS,
        }
    }

    /// Verifier ready to check tokens against `metadata`
    pub fn new(metadata: ProviderMetadata) -> Self {
        Self {
            snapshot: RwLock::new(Some(Arc::new(metadata))),
            leeway: DEFAULT_LEEWAY_SECS,
        }
    }

    /// Set the tolerated clock skew for `exp` and `nbf`
    #[must_use]
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway = leeway_secs;
        self
    }

    /// Replace the provider snapshot
    pub fn install(&self, metadata: ProviderMetadata) {
        *self.snapshot.write() = Some(Arc::new(metadata));
    }

    /// Current provider snapshot
    pub fn snapshot(&self) -> Option<Arc<ProviderMetadata>> {
        self.snapshot.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot.read().is_some()
    }

    /// Re-fetch the signing keys and swap in a new snapshot.
    ///
    /// On any failure the current snapshot stays in place.
    pub async fn refresh(&self, client: &reqwest::Client) -> Result<(), AuthError> {
        let current = self.snapshot().ok_or(AuthError::VerifierNotReady)?;
        let jwks_uri = current.jwks_uri.as_deref().ok_or_else(|| {
            AuthError::DiscoveryFailed("provider keys were not fetched from a JWKS endpoint".into())
        })?;

        let jwks = discovery::fetch_jwks(client, jwks_uri).await?;
        let keys = KeySet::from_jwks(&jwks)?;
        let count = keys.len();

        self.install(current.with_keys(keys));
        info!(jwks_uri, keys = count, "Signing keys refreshed");
        Ok(())
    }

    /// Refresh the signing keys every `interval` in the background
    pub fn spawn_refresh(
        self: &Arc<Self>,
        client: reqwest::Client,
        interval: Duration,
    ) -> JoinHandle<()> {
        let verifier = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = refresh_ticker(interval);
            // the first tick fires immediately and startup has just fetched the keys
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match verifier.refresh(&client).await {
                    Ok(()) => crate::metrics::record_key_refresh(true),
                    Err(e) => {
                        crate::metrics::record_key_refresh(false);
                        warn!(error = %e, "Signing key refresh failed, keeping previous keys");
                    }
                }
            }
        })
    }

    /// Verify a raw `Authorization` header value
    pub fn verify(&self, raw_header: &str) -> Result<VerifiedClaims, AuthError> {
        let metadata = self.snapshot().ok_or(AuthError::VerifierNotReady)?;
        let token = extract_bearer(Some(raw_header))?;
        self.verify_with(&metadata, token)
    }

    /// Verify a bare token (scheme marker already stripped)
    pub fn verify_token(&self, token: &str) -> Result<VerifiedClaims, AuthError> {
        let metadata = self.snapshot().ok_or(AuthError::VerifierNotReady)?;
        self.verify_with(&metadata, token)
    }

    fn verify_with(
        &self,
        metadata: &ProviderMetadata,
        token: &str,
    ) -> Result<VerifiedClaims, AuthError> {
        let header = decode_header(token)
            .map_err(|e| AuthError::InvalidToken(format!("Invalid token header: {}", e)))?;

        if !metadata.allows(header.alg) {
            return Err(AuthError::InvalidToken(format!(
                "algorithm {:?} is not advertised by the provider",
                header.alg
            )));
        }

        let candidates = metadata.keys.candidates(header.kid.as_deref(), header.alg)?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[&metadata.issuer]);
        validation.set_audience(&[&metadata.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        // Signatures are checked before claims, so only a signature mismatch
        // means another candidate may still fit.
        for key in candidates {
            match decode::<Map<String, Value>>(token, key.decoding_key(), &validation) {
                Ok(token_data) => {
                    let claims = VerifiedClaims::from_claims(token_data.claims)?;
                    debug!(
                        subject = %claims.subject,
                        kid = key.kid().unwrap_or("<none>"),
                        "Token verified"
                    );
                    return Ok(claims);
                }
                Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => continue,
                Err(e) => return Err(AuthError::InvalidToken(describe(e.kind()))),
            }
        }

        Err(AuthError::InvalidToken(describe(&ErrorKind::InvalidSignature)))
    }
}

fn describe(kind: &ErrorKind) -> String {
    match kind {
        ErrorKind::ExpiredSignature => "token expired".into(),
        ErrorKind::ImmatureSignature => "token not yet valid".into(),
        ErrorKind::InvalidSignature => "invalid signature".into(),
        ErrorKind::InvalidIssuer => "issuer mismatch".into(),
        ErrorKind::InvalidAudience => "audience mismatch".into(),
        ErrorKind::MissingRequiredClaim(claim) => format!("missing required claim '{}'", claim),
        ErrorKind::InvalidAlgorithm => "algorithm not allowed for key".into(),
        other => format!("{:?}", other),
    }
}

/// A slow refresh pushes the next one back instead of firing the missed ticks together
fn refresh_ticker(interval: Duration) -> Interval {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
