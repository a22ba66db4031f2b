#![cfg(feature = "failpoints")]
#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection in the authn crate.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p tollgate-authn --features failpoints --test failpoint_tests
//! ```

use std::{sync::Arc, time::Duration};

use tollgate_authn::{
    AuthError, MetadataResolver, SigningKeyCache,
    testutil::{MockAuthority, TestKey},
};
use url::Url;

const AUTHORITY: &str = "https://auth.example.com/realms/failpoints";

fn setup_cache_with_key() -> (Arc<MockAuthority>, SigningKeyCache) {
    let mock = Arc::new(MockAuthority::new(AUTHORITY));
    mock.add_key(TestKey::generate("fp-test-key").jwk());

    let resolver = Arc::new(MetadataResolver::new(mock.clone()));
    let cache = SigningKeyCache::with_options(
        resolver,
        mock.clone(),
        Url::parse(AUTHORITY).expect("authority url"),
        Duration::from_secs(300),
        Duration::from_secs(10),
        Duration::from_secs(5),
    );
    (mock, cache)
}

#[tokio::test]
async fn metadata_fetch_failpoint_returns_error() {
    let scenario = fail::FailScenario::setup();
    let (mock, cache) = setup_cache_with_key();

    fail::cfg("metadata-before-fetch", "return").expect("failed to configure fail point");

    let result = cache.get_key("fp-test-key").await;
    assert!(
        matches!(result, Err(AuthError::MetadataFetch { .. })),
        "discovery should fail when fail point is active: {result:?}"
    );
    assert_eq!(mock.discovery_calls(), 0);

    scenario.teardown();
}

#[tokio::test]
async fn jwks_fetch_failpoint_returns_error() {
    let scenario = fail::FailScenario::setup();
    let (mock, cache) = setup_cache_with_key();

    fail::cfg("jwks-before-fetch", "return").expect("failed to configure fail point");

    let result = cache.get_key("fp-test-key").await;
    assert!(
        matches!(result, Err(AuthError::JwksFetch { .. })),
        "JWKS fetch should fail when fail point is active: {result:?}"
    );
    assert_eq!(mock.jwks_calls(), 0);

    scenario.teardown();
}

#[tokio::test]
async fn jwks_failure_is_not_cached() {
    let scenario = fail::FailScenario::setup();
    let (mock, cache) = setup_cache_with_key();

    fail::cfg("jwks-before-fetch", "1*return").expect("failed to configure fail point");

    assert!(cache.get_key("fp-test-key").await.is_err());
    let key = cache.get_key("fp-test-key").await.expect("second lookup should fetch again");
    assert_eq!(key.kid(), "fp-test-key");
    assert_eq!(mock.jwks_calls(), 1);

    scenario.teardown();
}

#[tokio::test]
async fn fetch_without_failpoint_succeeds() {
    let scenario = fail::FailScenario::setup();
    let (_mock, cache) = setup_cache_with_key();

    let result = cache.get_key("fp-test-key").await;
    assert!(result.is_ok(), "fetch should succeed without fail point");

    scenario.teardown();
}
