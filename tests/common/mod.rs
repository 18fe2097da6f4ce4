//! Shared fixtures: a symmetric signing key published as a JWK set, token
//! minting, and a fake identity provider on a mock server.

#![allow(dead_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use vmgate::auth::discovery::ProviderMetadata;
use vmgate::auth::jwks::Jwks;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ISSUER: &str = "https://idp.example.com/realms/lab";
pub const AUDIENCE: &str = "vmgate";
pub const KID: &str = "lab-signing-key";
pub const SECRET: &[u8] = b"vmgate-integration-test-signing-secret";

pub const JWKS_PATH: &str = "/protocol/openid-connect/certs";

/// JWK set publishing `secret` under `kid`, pinned to HS256
pub fn jwks_json(kid: &str, secret: &[u8]) -> Value {
    json!({
        "keys": [{
            "kty": "oct",
            "kid": kid,
            "use": "sig",
            "alg": "HS256",
            "k": URL_SAFE_NO_PAD.encode(secret),
        }]
    })
}

pub fn jwks() -> Jwks {
    serde_json::from_value(jwks_json(KID, SECRET)).unwrap()
}

/// Provider snapshot without discovery
pub fn metadata() -> ProviderMetadata {
    ProviderMetadata::from_parts(ISSUER, AUDIENCE, &jwks()).unwrap()
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Valid claims for `issuer` with the given roles value
pub fn claims_for(issuer: &str, subject: &str, roles: Value) -> Value {
    json!({
        "sub": subject,
        "iss": issuer,
        "aud": AUDIENCE,
        "iat": now(),
        "exp": now() + 3600,
        "roles": roles,
    })
}

pub fn claims(subject: &str, roles: Value) -> Value {
    claims_for(ISSUER, subject, roles)
}

pub fn sign_with(claims: &Value, kid: Option<&str>, algorithm: Algorithm, secret: &[u8]) -> String {
    let mut header = Header::new(algorithm);
    header.kid = kid.map(str::to_string);
    encode(&header, claims, &EncodingKey::from_secret(secret)).unwrap()
}

/// Token signed with the fixture key
pub fn sign(claims: &Value) -> String {
    sign_with(claims, Some(KID), Algorithm::HS256, SECRET)
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

pub fn admin_token() -> String {
    sign(&claims("alice", json!(["admin", "viewer"])))
}

pub fn viewer_token() -> String {
    sign(&claims("bob", json!(["viewer"])))
}

/// Mount a discovery document and the fixture JWK set; returns the issuer URL
pub async fn mount_provider(server: &MockServer) -> String {
    let issuer = server.uri();

    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": issuer,
            "jwks_uri": format!("{}{}", issuer, JWKS_PATH),
            "id_token_signing_alg_values_supported": ["HS256"],
        })))
        .mount(server)
        .await;

    mount_jwks(server, jwks_json(KID, SECRET)).await;
    issuer
}

pub async fn mount_jwks(server: &MockServer, jwks: Value) {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
        .mount(server)
        .await;
}
