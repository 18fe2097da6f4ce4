//! Token Verifier Integration Tests
//!
//! Discovery against a fake identity provider, signature and claim checks,
//! and signing key rotation.

mod common;

use common::*;
use jsonwebtoken::Algorithm;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vmgate::auth::discovery::{self, ProviderMetadata};
use vmgate::auth::jwks::Jwks;
use vmgate::auth::{AuthError, TokenVerifier};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> reqwest::Client {
    discovery::http_client(Duration::from_secs(5)).unwrap()
}

fn ready_verifier() -> TokenVerifier {
    TokenVerifier::new(metadata())
}

// ========================================================================
// Discovery
// ========================================================================

#[tokio::test]
async fn test_discover_loads_issuer_and_keys() {
    let mock_server = MockServer::start().await;
    let issuer = mount_provider(&mock_server).await;

    let metadata = discovery::discover(&client(), &issuer, AUDIENCE)
        .await
        .expect("discovery should succeed");

    assert_eq!(metadata.issuer, issuer);
    assert_eq!(metadata.audience, AUDIENCE);
    assert_eq!(metadata.keys.len(), 1);
    assert_eq!(
        metadata.jwks_uri.as_deref(),
        Some(format!("{}{}", issuer, JWKS_PATH).as_str())
    );
}

#[tokio::test]
async fn test_discover_accepts_trailing_slash_in_configured_issuer() {
    let mock_server = MockServer::start().await;
    let issuer = mount_provider(&mock_server).await;

    let metadata = discovery::discover(&client(), &format!("{}/", issuer), AUDIENCE)
        .await
        .expect("discovery should succeed");
    assert_eq!(metadata.issuer, issuer);
}

#[tokio::test]
async fn test_discover_rejects_issuer_mismatch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": "https://evil.example.com",
            "jwks_uri": format!("{}{}", mock_server.uri(), JWKS_PATH),
        })))
        .mount(&mock_server)
        .await;

    let result = discovery::discover(&client(), &mock_server.uri(), AUDIENCE).await;
    assert!(matches!(result, Err(AuthError::DiscoveryFailed(_))));
}

#[tokio::test]
async fn test_discover_fails_on_http_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let result = discovery::discover(&client(), &mock_server.uri(), AUDIENCE).await;
    assert!(matches!(result, Err(AuthError::DiscoveryFailed(_))));
}

#[tokio::test]
async fn test_discover_fails_without_usable_keys() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": mock_server.uri(),
            "jwks_uri": format!("{}{}", mock_server.uri(), JWKS_PATH),
        })))
        .mount(&mock_server)
        .await;
    mount_jwks(&mock_server, json!({"keys": []})).await;

    let result = discovery::discover(&client(), &mock_server.uri(), AUDIENCE).await;
    assert!(matches!(result, Err(AuthError::DiscoveryFailed(_))));
}

#[tokio::test]
async fn test_discover_records_advertised_algorithms() {
    let mock_server = MockServer::start().await;
    let issuer = mount_provider(&mock_server).await;

    let metadata = discovery::discover(&client(), &issuer, AUDIENCE).await.unwrap();
    assert_eq!(metadata.algorithms, vec![Algorithm::HS256]);
}

#[tokio::test]
async fn test_token_algorithm_must_be_advertised() {
    let mock_server = MockServer::start().await;
    let issuer = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": issuer,
            "jwks_uri": format!("{}{}", issuer, JWKS_PATH),
            "id_token_signing_alg_values_supported": ["RS256"],
        })))
        .mount(&mock_server)
        .await;
    mount_jwks(&mock_server, jwks_json(KID, SECRET)).await;

    let metadata = discovery::discover(&client(), &issuer, AUDIENCE).await.unwrap();
    let verifier = TokenVerifier::new(metadata);

    // correctly signed with the published key, but HS256 is not advertised
    let token = sign(&claims_for(&issuer, "alice", json!(["admin"])));
    assert!(matches!(
        verifier.verify(&bearer(&token)),
        Err(AuthError::InvalidToken(_))
    ));
}

#[tokio::test]
async fn test_discover_without_advertised_algorithms_assumes_rs256() {
    let mock_server = MockServer::start().await;
    let issuer = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": issuer,
            "jwks_uri": format!("{}{}", issuer, JWKS_PATH),
        })))
        .mount(&mock_server)
        .await;
    mount_jwks(&mock_server, jwks_json(KID, SECRET)).await;

    let metadata = discovery::discover(&client(), &issuer, AUDIENCE).await.unwrap();
    assert_eq!(metadata.algorithms, vec![Algorithm::RS256]);
}

#[tokio::test]
async fn test_discover_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"issuer": mock_server.uri(), "jwks_uri": "x"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let client = discovery::http_client(Duration::from_millis(200)).unwrap();
    let started = std::time::Instant::now();
    let result = discovery::discover(&client, &mock_server.uri(), AUDIENCE).await;

    assert!(matches!(result, Err(AuthError::DiscoveryFailed(_))));
    assert!(started.elapsed() < Duration::from_secs(4));
}

// ========================================================================
// Verification
// ========================================================================

#[test]
fn test_valid_token_accepted() {
    let verifier = ready_verifier();
    let claims = verifier
        .verify(&bearer(&admin_token()))
        .expect("valid token should verify");

    assert_eq!(claims.subject, "alice");
    assert_eq!(claims.claims["roles"], json!(["admin", "viewer"]));
}

#[test]
fn test_missing_scheme_rejected() {
    let verifier = ready_verifier();
    let token = admin_token();

    let headers = vec![
        String::new(),
        token.clone(),
        format!("bearer {}", token),
        "Bearer  ".to_string(),
    ];

    for header in &headers {
        assert!(
            matches!(verifier.verify(header), Err(AuthError::MissingCredential)),
            "{:?} should be a missing credential",
            header
        );
    }
}

#[test]
fn test_wrong_signature_rejected() {
    let verifier = ready_verifier();
    let token = sign_with(
        &claims("alice", json!(["admin"])),
        Some(KID),
        Algorithm::HS256,
        b"some-other-secret-entirely",
    );

    assert!(matches!(
        verifier.verify(&bearer(&token)),
        Err(AuthError::InvalidToken(_))
    ));
}

#[test]
fn test_expired_token_rejected() {
    let verifier = ready_verifier();
    let mut expired = claims("alice", json!(["admin"]));
    expired["iat"] = json!(now() - 7200);
    expired["exp"] = json!(now() - 3600);

    let result = verifier.verify(&bearer(&sign(&expired)));
    match result {
        Err(AuthError::InvalidToken(reason)) => assert!(reason.contains("expired")),
        other => panic!("expected invalid token, got {:?}", other),
    }
}

#[test]
fn test_not_yet_valid_token_rejected() {
    let verifier = ready_verifier();
    let mut immature = claims("alice", json!(["admin"]));
    immature["nbf"] = json!(now() + 3600);

    assert!(matches!(
        verifier.verify(&bearer(&sign(&immature))),
        Err(AuthError::InvalidToken(_))
    ));
}

#[test]
fn test_missing_expiry_rejected() {
    let verifier = ready_verifier();
    let mut forever = claims("alice", json!(["admin"]));
    forever.as_object_mut().unwrap().remove("exp");

    assert!(matches!(
        verifier.verify(&bearer(&sign(&forever))),
        Err(AuthError::InvalidToken(_))
    ));
}

#[test]
fn test_wrong_issuer_rejected() {
    let verifier = ready_verifier();
    let token = sign(&claims_for("https://other.example.com", "alice", json!(["admin"])));

    assert!(matches!(
        verifier.verify(&bearer(&token)),
        Err(AuthError::InvalidToken(_))
    ));
}

#[test]
fn test_wrong_audience_rejected() {
    let verifier = ready_verifier();
    let mut other_client = claims("alice", json!(["admin"]));
    other_client["aud"] = json!("some-other-client");

    assert!(matches!(
        verifier.verify(&bearer(&sign(&other_client))),
        Err(AuthError::InvalidToken(_))
    ));
}

#[test]
fn test_audience_list_containing_client_accepted() {
    let verifier = ready_verifier();
    let mut multi = claims("alice", json!(["admin"]));
    multi["aud"] = json!(["account", AUDIENCE]);

    assert!(verifier.verify(&bearer(&sign(&multi))).is_ok());
}

#[test]
fn test_unknown_key_id_rejected() {
    let verifier = ready_verifier();
    let token = sign_with(
        &claims("alice", json!(["admin"])),
        Some("unknown-kid"),
        Algorithm::HS256,
        SECRET,
    );

    assert!(matches!(
        verifier.verify(&bearer(&token)),
        Err(AuthError::InvalidToken(_))
    ));
}

#[test]
fn test_algorithm_substitution_rejected() {
    let verifier = ready_verifier();
    // right secret, but the key is pinned to HS256
    let token = sign_with(
        &claims("alice", json!(["admin"])),
        Some(KID),
        Algorithm::HS512,
        SECRET,
    );

    assert!(matches!(
        verifier.verify(&bearer(&token)),
        Err(AuthError::InvalidToken(_))
    ));
}

#[test]
fn test_token_without_kid_uses_single_key() {
    let verifier = ready_verifier();
    let token = sign_with(&claims("alice", json!(["admin"])), None, Algorithm::HS256, SECRET);

    assert!(verifier.verify(&bearer(&token)).is_ok());
}

#[test]
fn test_token_without_kid_tries_every_key() {
    let rotated_secret: &[u8] = b"next-signing-secret-during-rotation";
    let mut keys = jwks_json(KID, SECRET);
    let next = jwks_json("next", rotated_secret)["keys"][0].clone();
    keys["keys"].as_array_mut().unwrap().push(next);

    let jwks: Jwks = serde_json::from_value(keys).unwrap();
    let verifier = TokenVerifier::new(ProviderMetadata::from_parts(ISSUER, AUDIENCE, &jwks).unwrap());
    let claims = claims("alice", json!(["admin"]));

    for secret in [SECRET, rotated_secret] {
        let token = sign_with(&claims, None, Algorithm::HS256, secret);
        let verified = verifier
            .verify(&bearer(&token))
            .expect("kid-less token signed by a published key should verify");
        assert_eq!(verified.subject, "alice");
    }

    let forged = sign_with(&claims, None, Algorithm::HS256, b"not-published-anywhere");
    assert!(matches!(
        verifier.verify(&bearer(&forged)),
        Err(AuthError::InvalidToken(_))
    ));
}

#[test]
fn test_kid_less_token_keeps_claim_errors() {
    let rotated_secret: &[u8] = b"next-signing-secret-during-rotation";
    let mut keys = jwks_json(KID, SECRET);
    let next = jwks_json("next", rotated_secret)["keys"][0].clone();
    keys["keys"].as_array_mut().unwrap().push(next);

    let jwks: Jwks = serde_json::from_value(keys).unwrap();
    let verifier = TokenVerifier::new(ProviderMetadata::from_parts(ISSUER, AUDIENCE, &jwks).unwrap());

    let mut expired = claims("alice", json!(["admin"]));
    expired["exp"] = json!(now() - 3600);
    let token = sign_with(&expired, None, Algorithm::HS256, rotated_secret);

    match verifier.verify(&bearer(&token)) {
        Err(AuthError::InvalidToken(reason)) => assert!(reason.contains("expired")),
        other => panic!("expected invalid token, got {:?}", other),
    }
}

#[test]
fn test_missing_subject_is_malformed_claims() {
    let verifier = ready_verifier();
    let mut anonymous = claims("alice", json!(["admin"]));
    anonymous.as_object_mut().unwrap().remove("sub");

    assert!(matches!(
        verifier.verify(&bearer(&sign(&anonymous))),
        Err(AuthError::MalformedClaims(_))
    ));
}

#[test]
fn test_verification_is_repeatable() {
    let verifier = ready_verifier();
    let header = bearer(&admin_token());

    let first = verifier.verify(&header).unwrap();
    let second = verifier.verify(&header).unwrap();
    assert_eq!(first.subject, second.subject);
    assert_eq!(first.claims, second.claims);
}

// ========================================================================
// Key rotation
// ========================================================================

#[tokio::test]
async fn test_refresh_picks_up_rotated_keys() {
    let mock_server = MockServer::start().await;
    let issuer = mount_provider(&mock_server).await;
    let client = client();

    let metadata = discovery::discover(&client, &issuer, AUDIENCE).await.unwrap();
    let verifier = TokenVerifier::new(metadata);

    let rotated_secret = b"rotated-signing-secret-for-tests";
    let old_token = sign(&claims_for(&issuer, "alice", json!(["admin"])));
    let new_token = sign_with(
        &claims_for(&issuer, "alice", json!(["admin"])),
        Some("rotated"),
        Algorithm::HS256,
        rotated_secret,
    );

    assert!(verifier.verify(&bearer(&old_token)).is_ok());
    assert!(verifier.verify(&bearer(&new_token)).is_err());

    mock_server.reset().await;
    mount_jwks(&mock_server, jwks_json("rotated", rotated_secret)).await;

    verifier.refresh(&client).await.expect("refresh should succeed");

    assert!(verifier.verify(&bearer(&new_token)).is_ok());
    assert!(matches!(
        verifier.verify(&bearer(&old_token)),
        Err(AuthError::InvalidToken(_))
    ));
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_keys() {
    let mock_server = MockServer::start().await;
    let issuer = mount_provider(&mock_server).await;
    let client = client();

    let metadata = discovery::discover(&client, &issuer, AUDIENCE).await.unwrap();
    let verifier = TokenVerifier::new(metadata);

    mock_server.reset().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    assert!(verifier.refresh(&client).await.is_err());

    let token = sign(&claims_for(&issuer, "alice", json!(["admin"])));
    assert!(verifier.verify(&bearer(&token)).is_ok());
}

#[tokio::test]
async fn test_concurrent_verification_during_rotation() {
    let verifier = Arc::new(ready_verifier());
    let header = bearer(&admin_token());

    let mut tasks = Vec::new();
    for i in 0..16 {
        let verifier = Arc::clone(&verifier);
        let header = header.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                if i % 4 == 0 {
                    verifier.install(metadata());
                }
                assert!(verifier.verify(&header).is_ok());
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }
}
