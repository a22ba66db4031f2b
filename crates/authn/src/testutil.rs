//! Shared test utilities for bearer-token testing.
//!
//! This module provides signing keys that publish themselves as JWKs, a raw
//! token builder for attack tests, and [`MockAuthority`], an in-memory
//! authorization server implementing [`HttpTransport`]. It is feature-gated
//! behind `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! tollgate-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use tollgate_authn::testutil::{MockAuthority, TestKey};
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use rand_core::OsRng;
use serde_json::{Value, json};
use url::Url;
use zeroize::Zeroizing;

use crate::transport::{HttpResponse, HttpTransport, TransportError};

const RSA_PRIVATE_PEM: &str = include_str!("../tests/fixtures/rsa_private.pem");
const RSA_PUBLIC_JWK: &str = include_str!("../tests/fixtures/rsa_public.jwk.json");
const EC_PRIVATE_PEM: &str = include_str!("../tests/fixtures/ec_private.pem");
const EC_PUBLIC_JWK: &str = include_str!("../tests/fixtures/ec_public.jwk.json");

/// Generates a test Ed25519 key pair.
///
/// Returns `(pkcs8_der, public_key_base64url)` where:
/// - `pkcs8_der` is the private key in PKCS#8 DER format wrapped in [`Zeroizing`] (suitable for
///   [`EncodingKey::from_ed_der`])
/// - `public_key_base64url` is the 32-byte public key encoded as base64url without padding
///   (the `x` member of an OKP JWK)
///
/// Each call generates a fresh random key pair.
pub fn generate_test_keypair() -> (Zeroizing<Vec<u8>>, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key_b64 = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());

    let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
    let mut pkcs8_der = Zeroizing::new(vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
    ]);
    pkcs8_der.extend_from_slice(&*private_bytes);

    (pkcs8_der, public_key_b64)
}

/// A private signing key together with its public JWK.
#[derive(Clone)]
pub struct TestKey {
    kid: String,
    algorithm: Algorithm,
    encoding: EncodingKey,
    public_jwk: Value,
}

impl TestKey {
    /// A fresh Ed25519 key (`EdDSA`).
    pub fn generate(kid: &str) -> Self {
        let (pkcs8_der, x) = generate_test_keypair();
        Self {
            kid: kid.to_owned(),
            algorithm: Algorithm::EdDSA,
            encoding: EncodingKey::from_ed_der(&pkcs8_der),
            public_jwk: json!({
                "kty": "OKP",
                "crv": "Ed25519",
                "use": "sig",
                "alg": "EdDSA",
                "x": x,
            }),
        }
    }

    /// The RSA fixture key (`RS256`).
    ///
    /// Every call returns the same key material under the given `kid`.
    pub fn rsa(kid: &str) -> Self {
        Self {
            kid: kid.to_owned(),
            algorithm: Algorithm::RS256,
            encoding: EncodingKey::from_rsa_pem(RSA_PRIVATE_PEM.as_bytes())
                .expect("RSA fixture key"),
            public_jwk: serde_json::from_str(RSA_PUBLIC_JWK).expect("RSA fixture JWK"),
        }
    }

    /// The P-256 fixture key (`ES256`).
    ///
    /// Every call returns the same key material under the given `kid`.
    pub fn ec(kid: &str) -> Self {
        Self {
            kid: kid.to_owned(),
            algorithm: Algorithm::ES256,
            encoding: EncodingKey::from_ec_pem(EC_PRIVATE_PEM.as_bytes()).expect("EC fixture key"),
            public_jwk: serde_json::from_str(EC_PUBLIC_JWK).expect("EC fixture JWK"),
        }
    }

    /// Key ID.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Signing algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The public key as a JWK carrying this key's `kid`.
    pub fn jwk(&self) -> Value {
        let mut jwk = self.public_jwk.clone();
        jwk["kid"] = json!(self.kid);
        jwk
    }

    /// Signs `claims` with a header naming this key's algorithm and `kid`.
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.kid.clone());
        self.sign_with_header(&header, claims)
    }

    /// Signs `claims` under an arbitrary header.
    ///
    /// The header's `alg` must belong to this key's family.
    pub fn sign_with_header(&self, header: &Header, claims: &Value) -> String {
        jsonwebtoken::encode(header, claims, &self.encoding).expect("Failed to encode test JWT")
    }
}

impl std::fmt::Debug for TestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Claims for a token that is valid for the next hour.
pub fn standard_claims(issuer: &str, audience: &str, subject: &str) -> Value {
    let now = Utc::now().timestamp();
    json!({
        "iss": issuer,
        "sub": subject,
        "aud": audience,
        "exp": now + 3600,
        "iat": now,
        "scope": "greeting:read greeting:write",
    })
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The resulting JWT has the structure `{header_b64}.{payload_b64}.`
/// with an empty signature. This is useful for testing rejection of
/// malformed or attack JWTs (e.g., `alg: "none"`, algorithm confusion).
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &Value, payload_json: &Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

#[derive(Default)]
struct MockState {
    keys: Vec<Value>,
    discovery_override: Option<HttpResponse>,
    jwks_override: Option<HttpResponse>,
    token_override: Option<HttpResponse>,
    minter: Option<TokenMinter>,
    token_requests: Vec<Vec<(String, String)>>,
}

struct TokenMinter {
    key: TestKey,
    audience: String,
    lifetime: Duration,
}

/// In-memory authorization server.
///
/// Serves a discovery document, a JWKS and a token endpoint using the
/// Keycloak URL layout under the given authority, and counts every call.
/// Responses can be overridden per endpoint to simulate failures.
pub struct MockAuthority {
    authority: String,
    state: Mutex<MockState>,
    discovery_calls: AtomicUsize,
    jwks_calls: AtomicUsize,
    token_calls: AtomicUsize,
    fail_requests: AtomicBool,
    latency: Mutex<Duration>,
}

impl MockAuthority {
    /// Creates an authority rooted at `authority` with an empty key set.
    pub fn new(authority: &str) -> Self {
        Self {
            authority: authority.trim_end_matches('/').to_owned(),
            state: Mutex::new(MockState::default()),
            discovery_calls: AtomicUsize::new(0),
            jwks_calls: AtomicUsize::new(0),
            token_calls: AtomicUsize::new(0),
            fail_requests: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// The authority URL as passed to [`new`](Self::new), minus any trailing `/`.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The published JWKS location.
    pub fn jwks_uri(&self) -> Url {
        Url::parse(&format!("{}/protocol/openid-connect/certs", self.authority)).unwrap()
    }

    /// The published token endpoint.
    pub fn token_endpoint(&self) -> Url {
        Url::parse(&format!("{}/protocol/openid-connect/token", self.authority)).unwrap()
    }

    /// The discovery document served by default.
    pub fn discovery_document(&self) -> Value {
        json!({
            "issuer": self.authority,
            "jwks_uri": self.jwks_uri().as_str(),
            "token_endpoint": self.token_endpoint().as_str(),
            "id_token_signing_alg_values_supported": ["RS256", "ES256", "EdDSA"],
            "grant_types_supported": ["client_credentials", "password", "refresh_token"],
            "response_types_supported": ["code"],
        })
    }

    /// Replaces the discovery response.
    pub fn set_discovery_response(&self, response: HttpResponse) {
        self.state.lock().discovery_override = Some(response);
    }

    /// Restores the default discovery document.
    pub fn reset_discovery_response(&self) {
        self.state.lock().discovery_override = None;
    }

    /// Publishes a key in the JWKS.
    pub fn add_key(&self, jwk: Value) {
        self.state.lock().keys.push(jwk);
    }

    /// Replaces the published key set.
    pub fn set_keys(&self, keys: Vec<Value>) {
        self.state.lock().keys = keys;
    }

    /// Replaces the JWKS response.
    pub fn set_jwks_response(&self, response: HttpResponse) {
        self.state.lock().jwks_override = Some(response);
    }

    /// Replaces the token endpoint response.
    pub fn set_token_response(&self, response: HttpResponse) {
        self.state.lock().token_override = Some(response);
    }

    /// Restores the default token endpoint behaviour.
    pub fn reset_token_response(&self) {
        self.state.lock().token_override = None;
    }

    /// Makes the token endpoint issue real JWTs signed by `key`.
    ///
    /// The `sub` claim is the requesting `client_id` (or `username` for the
    /// password grant). Without a minter the endpoint issues opaque tokens.
    pub fn mint_tokens(&self, key: TestKey, audience: &str, lifetime: Duration) {
        self.state.lock().minter =
            Some(TokenMinter { key, audience: audience.to_owned(), lifetime });
    }

    /// Form bodies received by the token endpoint, oldest first.
    pub fn token_requests(&self) -> Vec<Vec<(String, String)>> {
        self.state.lock().token_requests.clone()
    }

    /// Number of discovery requests served.
    pub fn discovery_calls(&self) -> usize {
        self.discovery_calls.load(Ordering::SeqCst)
    }

    /// Number of JWKS requests served.
    pub fn jwks_calls(&self) -> usize {
        self.jwks_calls.load(Ordering::SeqCst)
    }

    /// Number of token requests served.
    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    /// When `true`, every request fails with a connection error.
    pub fn fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::SeqCst);
    }

    /// Delays every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    async fn before_request(&self) -> Result<(), TransportError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(TransportError::connect("connection refused"));
        }
        Ok(())
    }

    fn jwks_response(&self) -> HttpResponse {
        let state = self.state.lock();
        if let Some(response) = &state.jwks_override {
            return response.clone();
        }
        HttpResponse::new(200, json!({ "keys": state.keys }).to_string())
    }

    fn token_response(&self, form: &[(&str, &str)]) -> HttpResponse {
        let call = self.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock();
        state
            .token_requests
            .push(form.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect());

        if let Some(response) = &state.token_override {
            return response.clone();
        }

        let field = |name: &str| form.iter().find(|(k, _)| *k == name).map(|(_, v)| *v);
        let subject = field("username").or_else(|| field("client_id")).unwrap_or("anonymous");

        let (access_token, expires_in) = match &state.minter {
            Some(minter) => {
                let now = Utc::now().timestamp();
                let lifetime = minter.lifetime.as_secs();
                let mut claims = standard_claims(&self.authority, &minter.audience, subject);
                claims["exp"] = json!(now + lifetime as i64);
                claims["jti"] = json!(format!("token-{call}"));
                (minter.key.sign(&claims), lifetime)
            },
            None => (format!("opaque-token-{call}"), 300),
        };

        HttpResponse::new(
            200,
            json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "expires_in": expires_in,
                "scope": field("scope").unwrap_or(""),
            })
            .to_string(),
        )
    }
}

impl std::fmt::Debug for MockAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAuthority").field("authority", &self.authority).finish_non_exhaustive()
    }
}

#[async_trait]
impl HttpTransport for MockAuthority {
    async fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
        self.before_request().await?;

        if url.path().ends_with("/.well-known/openid-configuration") {
            self.discovery_calls.fetch_add(1, Ordering::SeqCst);
            let response = self.state.lock().discovery_override.clone();
            return Ok(response
                .unwrap_or_else(|| HttpResponse::new(200, self.discovery_document().to_string())));
        }
        if *url == self.jwks_uri() {
            self.jwks_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(self.jwks_response());
        }
        Ok(HttpResponse::new(404, "not found"))
    }

    async fn post_form(
        &self,
        url: &Url,
        form: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        self.before_request().await?;

        if *url == self.token_endpoint() {
            return Ok(self.token_response(form));
        }
        Ok(HttpResponse::new(404, "not found"))
    }
}

/// Asserts that a [`Result<T, AuthError>`] is an `Err` matching the given [`AuthError`] variant.
///
/// Works with any `AuthError` variant. On failure, prints the expected variant
/// and the actual result for debugging.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use tollgate_authn::assert_auth_error;
/// use tollgate_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::token_expired());
/// assert_auth_error!(result, TokenExpired);
/// ```
///
/// [`AuthError`]: crate::error::AuthError
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}
