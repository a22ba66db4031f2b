//! Request-boundary pipeline tests.
//!
//! Exercise [`BearerGate`] end to end against an in-memory authority:
//! anonymous routes, missing and malformed `Authorization` headers, valid and
//! invalid tokens, and the `WWW-Authenticate` challenge for each rejection.
#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use rstest::rstest;
use serde_json::json;
use tollgate_authn::{
    AuthError, AuthOutcome, AuthnConfig, BearerGate, Rejection,
    testutil::{MockAuthority, TestKey, standard_claims},
};

const AUTHORITY: &str = "https://auth.example.com/realms/demo";
const AUDIENCE: &str = "greeting-api";

fn setup() -> (Arc<MockAuthority>, BearerGate, TestKey) {
    let mock = Arc::new(MockAuthority::new(AUTHORITY));
    let key = TestKey::rsa("rsa-1");
    mock.add_key(key.jwk());

    let config = AuthnConfig::builder()
        .authority(AUTHORITY)
        .audience(AUDIENCE)
        .anonymous_routes(vec!["/health".to_owned(), "/docs/{*rest}".to_owned()])
        .protected_routes(vec!["/docs/admin".to_owned()])
        .build()
        .expect("valid config");
    let gate = BearerGate::from_config(&config, mock.clone()).expect("gate");
    (mock, gate, key)
}

fn network_calls(mock: &MockAuthority) -> usize {
    mock.discovery_calls() + mock.jwks_calls()
}

// ===========================================================================
// Anonymous routes
// ===========================================================================

#[rstest]
#[case::no_header("/health", None)]
#[case::garbage_header("/health", Some("Bearer garbage"))]
#[case::query_string("/health?probe=liveness", None)]
#[case::wildcard("/docs/getting-started", None)]
#[tokio::test]
async fn test_anonymous_route_skips_validation(#[case] route: &str, #[case] header: Option<&str>) {
    let (mock, gate, _) = setup();

    let outcome = gate.authenticate(route, header).await.expect("anonymous route");

    assert_eq!(outcome, AuthOutcome::Anonymous);
    assert_eq!(network_calls(&mock), 0);
}

// ===========================================================================
// Protected routes
// ===========================================================================

#[rstest]
#[case::no_header(None)]
#[case::empty_header(Some(""))]
#[case::basic_scheme(Some("Basic dXNlcjpwYXNz"))]
#[case::scheme_only(Some("Bearer"))]
#[case::empty_token(Some("Bearer   "))]
#[tokio::test]
async fn test_protected_route_without_bearer_is_unauthenticated(#[case] header: Option<&str>) {
    let (mock, gate, _) = setup();

    let rejection = gate.authenticate("/greeting", header).await.expect_err("token required");

    assert!(matches!(rejection, Rejection::Unauthenticated));
    assert_eq!(rejection.status_code(), 401);
    assert_eq!(rejection.www_authenticate(), "Bearer");
    assert_eq!(network_calls(&mock), 0);
}

#[tokio::test]
async fn test_explicitly_protected_route_overrides_anonymous_pattern() {
    let (_, gate, _) = setup();

    let rejection = gate.authenticate("/docs/admin", None).await.expect_err("protected");
    assert!(matches!(rejection, Rejection::Unauthenticated));
}

#[tokio::test]
async fn test_unlisted_route_is_protected() {
    let (_, gate, _) = setup();
    assert!(gate.policy().requires_auth("/not/in/any/list"));
    assert!(gate.authenticate("/not/in/any/list", None).await.is_err());
}

#[tokio::test]
async fn test_valid_token_authenticates() {
    let (_, gate, key) = setup();
    let token = key.sign(&standard_claims(AUTHORITY, AUDIENCE, "service-account-ui"));
    let header = format!("Bearer {token}");

    let outcome = gate.authenticate("/greeting", Some(&header)).await.expect("authenticated");

    let principal = outcome.principal().expect("principal");
    assert_eq!(principal.subject(), "service-account-ui");
}

#[tokio::test]
async fn test_scheme_is_case_insensitive() {
    let (_, gate, key) = setup();
    let token = key.sign(&standard_claims(AUTHORITY, AUDIENCE, "svc"));
    let header = format!("bearer {token}");

    assert!(gate.authenticate("/greeting", Some(&header)).await.is_ok());
}

#[tokio::test]
async fn test_invalid_token_rejected_with_challenge() {
    let (_, gate, key) = setup();
    let mut claims = standard_claims(AUTHORITY, AUDIENCE, "svc");
    claims["aud"] = json!("billing-api");
    let header = format!("Bearer {}", key.sign(&claims));

    let rejection = gate.authenticate("/greeting", Some(&header)).await.expect_err("wrong audience");

    let Rejection::InvalidToken(err) = &rejection else {
        panic!("expected InvalidToken, got {rejection:?}");
    };
    assert_eq!(err.failed_claim(), Some("aud"));
    assert_eq!(rejection.status_code(), 401);
    assert!(rejection.www_authenticate().starts_with(r#"Bearer error="invalid_token""#));
}

#[tokio::test]
async fn test_authority_outage_is_invalid_token() {
    let (mock, gate, key) = setup();
    mock.fail_requests(true);
    let header = format!("Bearer {}", key.sign(&standard_claims(AUTHORITY, AUDIENCE, "svc")));

    let rejection = gate.authenticate("/greeting", Some(&header)).await.expect_err("outage");

    let Rejection::InvalidToken(err) = &rejection else {
        panic!("expected InvalidToken, got {rejection:?}");
    };
    assert!(matches!(err, AuthError::MetadataFetch { .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_invalid_route_pattern_rejected_at_startup() {
    let mock = Arc::new(MockAuthority::new(AUTHORITY));
    let config = AuthnConfig::builder()
        .authority(AUTHORITY)
        .audience(AUDIENCE)
        .anonymous_routes(vec!["/items/{id}".to_owned(), "/items/{key}".to_owned()])
        .build()
        .expect("config itself is valid");

    let result = BearerGate::from_config(&config, mock);
    assert!(matches!(result, Err(AuthError::InvalidConfig { .. })));
}
