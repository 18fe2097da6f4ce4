//! JWKS (JSON Web Key Set) handling
//!
//! Converts the identity provider's published keys into decoding keys and
//! picks the right one for a token.
//!
//! # Example
//!
//! ```
//! use vmgate::auth::jwks::{Jwks, KeySet};
//!
//! let json = r#"{"keys": [{"kty": "oct", "kid": "k1", "alg": "HS256", "k": "c2VjcmV0LXNpZ25pbmcta2V5"}]}"#;
//! let jwks: Jwks = serde_json::from_str(json).unwrap();
//! let keys = KeySet::from_jwks(&jwks).unwrap();
//! assert_eq!(keys.len(), 1);
//! ```

use super::AuthError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// A single JSON Web Key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA", "EC", "OKP", "oct")
    pub kty: String,

    /// Key ID
    #[serde(default)]
    pub kid: Option<String>,

    /// Intended use ("sig" for signature)
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// Algorithm (e.g., "RS256", "ES256")
    #[serde(default)]
    pub alg: Option<String>,

    // RSA parameters
    /// RSA modulus (base64url encoded)
    #[serde(default)]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded)
    #[serde(default)]
    pub e: Option<String>,

    // EC / OKP parameters
    /// Curve (e.g., "P-256", "Ed25519")
    #[serde(default)]
    pub crv: Option<String>,

    /// x coordinate (base64url encoded)
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url encoded)
    #[serde(default)]
    pub y: Option<String>,

    // Symmetric parameters
    /// Shared secret (base64url encoded)
    #[serde(default)]
    pub k: Option<String>,
}

/// Key families; a token's algorithm must belong to its key's family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ec,
    Okp,
    Symmetric,
}

impl KeyFamily {
    fn from_kty(kty: &str) -> Option<Self> {
        match kty {
            "RSA" => Some(KeyFamily::Rsa),
            "EC" => Some(KeyFamily::Ec),
            "OKP" => Some(KeyFamily::Okp),
            "oct" => Some(KeyFamily::Symmetric),
            _ => None,
        }
    }

    /// Family an algorithm signs with
    pub fn of(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => KeyFamily::Symmetric,
            Algorithm::ES256 | Algorithm::ES384 => KeyFamily::Ec,
            Algorithm::EdDSA => KeyFamily::Okp,
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => KeyFamily::Rsa,
        }
    }
}

fn required<'a>(value: &'a Option<String>, what: &str) -> Result<&'a str, AuthError> {
    value
        .as_deref()
        .ok_or_else(|| AuthError::InvalidToken(format!("Missing {}", what)))
}

impl Jwk {
    /// Convert JWK to DecodingKey
    pub fn to_decoding_key(&self) -> Result<DecodingKey, AuthError> {
        match self.kty.as_str() {
            "RSA" => {
                let n = required(&self.n, "RSA modulus (n)")?;
                let e = required(&self.e, "RSA exponent (e)")?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| AuthError::InvalidToken(format!("Invalid RSA key: {}", e)))
            }
            "EC" => {
                let x = required(&self.x, "EC x coordinate")?;
                let y = required(&self.y, "EC y coordinate")?;
                DecodingKey::from_ec_components(x, y)
                    .map_err(|e| AuthError::InvalidToken(format!("Invalid EC key: {}", e)))
            }
            "OKP" => {
                let x = required(&self.x, "OKP public key (x)")?;
                DecodingKey::from_ed_components(x)
                    .map_err(|e| AuthError::InvalidToken(format!("Invalid OKP key: {}", e)))
            }
            "oct" => {
                let k = required(&self.k, "symmetric key (k)")?;
                let secret = URL_SAFE_NO_PAD
                    .decode(k.trim_end_matches('='))
                    .map_err(|e| AuthError::InvalidToken(format!("Invalid oct key: {}", e)))?;
                Ok(DecodingKey::from_secret(&secret))
            }
            other => Err(AuthError::InvalidToken(format!(
                "Unsupported key type: {}",
                other
            ))),
        }
    }

    /// Get the algorithm for this key, if it advertises a supported one
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.alg
            .as_deref()
            .and_then(|alg| Algorithm::from_str(alg).ok())
    }
}

/// JSON Web Key Set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// A signing key ready for verification
pub struct SigningKey {
    kid: Option<String>,
    algorithm: Option<Algorithm>,
    family: KeyFamily,
    key: DecodingKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    fn from_jwk(jwk: &Jwk) -> Result<Self, String> {
        if let Some(key_use) = jwk.key_use.as_deref() {
            if key_use != "sig" {
                return Err(format!("key use is '{}'", key_use));
            }
        }

        let family = KeyFamily::from_kty(&jwk.kty)
            .ok_or_else(|| format!("unsupported key type '{}'", jwk.kty))?;

        let algorithm = match jwk.alg.as_deref() {
            None => None,
            Some(alg) => {
                let algorithm = jwk
                    .algorithm()
                    .ok_or_else(|| format!("unsupported algorithm '{}'", alg))?;
                if KeyFamily::of(algorithm) != family {
                    return Err(format!("algorithm {:?} does not fit key type '{}'", algorithm, jwk.kty));
                }
                Some(algorithm)
            }
        };

        let key = jwk.to_decoding_key().map_err(|e| e.to_string())?;

        Ok(Self {
            kid: jwk.kid.clone(),
            algorithm,
            family,
            key,
        })
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    /// Algorithm to verify a token with, given the algorithm its header claims.
    ///
    /// A key that advertises `alg` accepts only that algorithm; otherwise the
    /// header algorithm must at least belong to the key's family.
    pub fn algorithm_for(&self, header_alg: Algorithm) -> Result<Algorithm, AuthError> {
        match self.algorithm {
            Some(pinned) if pinned != header_alg => Err(AuthError::InvalidToken(format!(
                "token algorithm {:?} does not match key algorithm {:?}",
                header_alg, pinned
            ))),
            Some(pinned) => Ok(pinned),
            None if KeyFamily::of(header_alg) != self.family => {
                Err(AuthError::InvalidToken(format!(
                    "token algorithm {:?} does not fit {:?} key",
                    header_alg, self.family
                )))
            }
            None => Ok(header_alg),
        }
    }
}

/// The provider's usable signing keys
#[derive(Debug, Default)]
pub struct KeySet {
    keys: Vec<SigningKey>,
}

impl KeySet {
    /// Convert every usable signing key; unusable keys are skipped.
    ///
    /// Fails only when no key survives.
    pub fn from_jwks(jwks: &Jwks) -> Result<Self, AuthError> {
        let mut keys = Vec::with_capacity(jwks.keys.len());

        for jwk in &jwks.keys {
            match SigningKey::from_jwk(jwk) {
                Ok(key) => keys.push(key),
                Err(reason) => warn!(
                    kid = jwk.kid.as_deref().unwrap_or("<none>"),
                    kty = %jwk.kty,
                    %reason,
                    "Skipping unusable JWK"
                ),
            }
        }

        if keys.is_empty() {
            return Err(AuthError::DiscoveryFailed("no usable signing keys".into()));
        }

        Ok(Self { keys })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key IDs in publication order
    pub fn kids(&self) -> impl Iterator<Item = Option<&str>> {
        self.keys.iter().map(SigningKey::kid)
    }

    /// Keys that may have signed a token with this `kid` and header algorithm.
    ///
    /// With a `kid` the key must be published under that ID and accept the
    /// algorithm. Without one every key accepting the algorithm is a
    /// candidate, in publication order.
    pub fn candidates(
        &self,
        kid: Option<&str>,
        header_alg: Algorithm,
    ) -> Result<Vec<&SigningKey>, AuthError> {
        match kid {
            Some(kid) => {
                let key = self
                    .keys
                    .iter()
                    .find(|key| key.kid() == Some(kid))
                    .ok_or_else(|| AuthError::InvalidToken(format!("Key not found: {}", kid)))?;
                key.algorithm_for(header_alg)?;
                Ok(vec![key])
            }
            None => {
                let keys: Vec<&SigningKey> = self
                    .keys
                    .iter()
                    .filter(|key| key.algorithm_for(header_alg).is_ok())
                    .collect();
                if keys.is_empty() {
                    return Err(AuthError::InvalidToken(format!(
                        "no published key accepts {:?}",
                        header_alg
                    )));
                }
                Ok(keys)
            }
        }
    }
}
