//! Authentication module
//!
//! Verifies OpenID Connect bearer tokens against the identity provider's
//! published signing keys and turns them into an authorization context.
//!
//! - [`discovery`] fetches issuer metadata and keys once at startup
//! - [`jwks`] converts JSON Web Keys into decoding keys
//! - [`verifier`] checks signature, lifetime, issuer and audience
//! - [`claims`] normalizes the roles attribute

use serde_json::{Map, Value};
use thiserror::Error;

pub mod claims;
pub mod discovery;
pub mod jwks;
pub mod verifier;

pub use claims::{AuthorizationContext, ClaimExtractor, Extraction};
pub use discovery::ProviderMetadata;
pub use verifier::TokenVerifier;

/// Scheme marker expected at the start of the `Authorization` header
pub const BEARER_SCHEME: &str = "Bearer ";

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing credential")]
    MissingCredential,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Verifier not ready")]
    VerifierNotReady,

    #[error("Malformed claims: {0}")]
    MalformedClaims(String),

    #[error("Provider discovery failed: {0}")]
    DiscoveryFailed(String),
}

impl AuthError {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::InvalidToken(_) => "invalid_token",
            AuthError::VerifierNotReady => "verifier_not_ready",
            AuthError::MalformedClaims(_) => "malformed_claims",
            AuthError::DiscoveryFailed(_) => "discovery_failed",
        }
    }
}

/// Decoded and signature-checked token payload.
///
/// Lives for a single request only.
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    pub subject: String,
    pub claims: Map<String, Value>,
}

impl VerifiedClaims {
    /// Build from a verified claim set, requiring a string `sub`
    pub fn from_claims(claims: Map<String, Value>) -> Result<Self, AuthError> {
        let subject = match claims.get("sub") {
            Some(Value::String(sub)) if !sub.is_empty() => sub.clone(),
            Some(Value::String(_)) => {
                return Err(AuthError::MalformedClaims("empty subject".into()))
            }
            Some(other) => {
                return Err(AuthError::MalformedClaims(format!(
                    "subject is not a string: {}",
                    json_type(other)
                )))
            }
            None => return Err(AuthError::MalformedClaims("missing subject".into())),
        };

        Ok(Self { subject, claims })
    }
}

/// Split the token off an `Authorization` header value.
///
/// The scheme is matched case-sensitively with exactly one space. A header
/// carrying the scheme but no token is treated as a missing credential.
pub fn extract_bearer(header: Option<&str>) -> Result<&str, AuthError> {
    let token = header
        .and_then(|value| value.strip_prefix(BEARER_SCHEME))
        .ok_or(AuthError::MissingCredential)?;

    if token.trim().is_empty() {
        return Err(AuthError::MissingCredential);
    }

    Ok(token)
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
