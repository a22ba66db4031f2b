//! End-to-end tests over real HTTP.
//!
//! An axum server on a loopback port plays the authorization server; the
//! validator talks to it through [`ReqwestTransport`] with insecure mode
//! enabled, since the test authority is plain `http`.
#![allow(clippy::expect_used, clippy::panic)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use tollgate_authn::{
    AuthError, AuthnConfig, BearerGate, Rejection, ReqwestTransport,
    testutil::{TestKey, standard_claims},
};
use tokio::net::TcpListener;

const AUDIENCE: &str = "greeting-api";
const REALM_PATH: &str = "/realms/e2e";

struct TestAuthority {
    authority: String,
    jwks_hits: Arc<AtomicUsize>,
}

async fn spawn_authority(keys: Vec<Value>, discovery_delay: Duration) -> TestAuthority {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let authority = format!("http://{addr}{REALM_PATH}");

    let discovery = json!({
        "issuer": authority,
        "jwks_uri": format!("{authority}/protocol/openid-connect/certs"),
        "token_endpoint": format!("{authority}/protocol/openid-connect/token"),
        "id_token_signing_alg_values_supported": ["RS256", "ES256"],
    });
    let jwks = json!({ "keys": keys });
    let jwks_hits = Arc::new(AtomicUsize::new(0));

    let hits = Arc::clone(&jwks_hits);
    let app = Router::new()
        .route(
            &format!("{REALM_PATH}/.well-known/openid-configuration"),
            get(move || {
                let discovery = discovery.clone();
                async move {
                    tokio::time::sleep(discovery_delay).await;
                    Json(discovery)
                }
            }),
        )
        .route(
            &format!("{REALM_PATH}/protocol/openid-connect/certs"),
            get(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                let jwks = jwks.clone();
                async move { Json(jwks) }
            }),
        );

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test authority crashed");
    });

    TestAuthority { authority, jwks_hits }
}

fn gate_for(authority: &str, timeout: Duration) -> BearerGate {
    let config = AuthnConfig::builder()
        .authority(authority)
        .audience(AUDIENCE)
        .allow_insecure_http(true)
        .http_timeout(timeout)
        .anonymous_routes(vec!["/health".to_owned()])
        .build()
        .expect("valid config");
    let transport = Arc::new(ReqwestTransport::new(config.http_timeout()).expect("transport"));
    BearerGate::from_config(&config, transport).expect("gate")
}

// ===========================================================================
// Happy path
// ===========================================================================

#[tokio::test]
async fn validates_token_against_live_authority() {
    let key = TestKey::rsa("live-rsa");
    let server = spawn_authority(vec![key.jwk()], Duration::ZERO).await;
    let gate = gate_for(&server.authority, Duration::from_secs(5));

    let token = key.sign(&standard_claims(&server.authority, AUDIENCE, "service-account-ui"));
    let header = format!("Bearer {token}");

    let first = gate.authenticate("/greeting", Some(&header)).await.expect("authenticated");
    let second = gate.authenticate("/greeting", Some(&header)).await.expect("authenticated");

    assert_eq!(first.principal().expect("principal").subject(), "service-account-ui");
    assert_eq!(first, second);
    assert_eq!(server.jwks_hits.load(Ordering::SeqCst), 1, "keys are cached between requests");
}

#[tokio::test]
async fn es256_token_against_live_authority() {
    let key = TestKey::ec("live-ec");
    let server = spawn_authority(vec![key.jwk()], Duration::ZERO).await;
    let gate = gate_for(&server.authority, Duration::from_secs(5));

    let token = key.sign(&standard_claims(&server.authority, AUDIENCE, "svc"));
    let header = format!("Bearer {token}");
    assert!(gate.authenticate("/greeting", Some(&header)).await.is_ok());
}

// ===========================================================================
// Transport failures
// ===========================================================================

#[tokio::test]
async fn plain_http_authority_refused_without_insecure_mode() {
    let result = AuthnConfig::builder()
        .authority("http://127.0.0.1:9/realms/e2e")
        .audience(AUDIENCE)
        .build();

    assert!(matches!(result, Err(AuthError::InsecureTransport { .. })), "got {result:?}");
}

#[tokio::test]
async fn slow_authority_times_out() {
    let key = TestKey::rsa("slow-rsa");
    let server = spawn_authority(vec![key.jwk()], Duration::from_secs(2)).await;
    let gate = gate_for(&server.authority, Duration::from_millis(100));

    let header = format!("Bearer {}", key.sign(&standard_claims(&server.authority, AUDIENCE, "svc")));
    let rejection = gate.authenticate("/greeting", Some(&header)).await.expect_err("timeout");

    let Rejection::InvalidToken(err) = &rejection else {
        panic!("expected InvalidToken, got {rejection:?}");
    };
    assert!(matches!(err, AuthError::MetadataFetch { .. }), "got {err:?}");
    assert!(err.is_transient());
}

#[tokio::test]
async fn unreachable_authority_is_transient() {
    // Bind and immediately release a port so nothing is listening on it.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let authority = format!("http://{addr}{REALM_PATH}");
    let gate = gate_for(&authority, Duration::from_secs(2));
    let token = TestKey::rsa("rsa").sign(&standard_claims(&authority, AUDIENCE, "svc"));
    let header = format!("Bearer {token}");

    let rejection = gate.authenticate("/greeting", Some(&header)).await.expect_err("unreachable");
    let Rejection::InvalidToken(err) = &rejection else {
        panic!("expected InvalidToken, got {rejection:?}");
    };
    assert!(err.is_transient(), "got {err:?}");
}

#[tokio::test]
async fn anonymous_route_needs_no_authority() {
    let gate = gate_for("http://127.0.0.1:9/realms/nowhere", Duration::from_millis(100));

    let outcome = gate.authenticate("/health", None).await.expect("anonymous");
    assert!(outcome.principal().is_none());
}
