//! JWT validation and claims.
//!
//! [`TokenValidator`] verifies a compact JWS bearer token against the keys
//! published by the configured authority. The checks run in a fixed order
//! and the first failure is final:
//!
//! 1. structure: three base64url segments with JSON header and payload
//! 2. header: `alg` in the allow-list, `kid` present (no key lookup before this)
//! 3. key lookup through the [`SigningKeyCache`]
//! 4. signature
//! 5. claims: `iss`, `aud`, `exp`, `nbf`, then `sub`
//!
//! Only a fully successful run produces a [`ValidatedPrincipal`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tollgate_authn::{AuthnConfig, ReqwestTransport, TokenValidator};
//!
//! # async fn example(token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthnConfig::builder()
//!     .authority("https://auth.example.com/realms/demo")
//!     .audience("account")
//!     .build()?;
//! let transport = Arc::new(ReqwestTransport::new(config.http_timeout())?);
//! let validator = TokenValidator::from_config(&config, transport)?;
//!
//! let principal = validator.validate(token).await?;
//! println!("subject: {}", principal.subject());
//! # Ok(())
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, Validation, decode};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    config::{AuthnConfig, DEFAULT_CLOCK_SKEW},
    error::{AuthError, Result},
    metadata::{MetadataResolver, issuers_match},
    signing_key_cache::SigningKeyCache,
    transport::HttpTransport,
    validation::{AlgorithmPolicy, validate_kid},
};

/// Upper bound on accepted token length, checked before any decoding.
pub const MAX_TOKEN_LENGTH: usize = 16 * 1024;

/// JOSE header fields inspected before verification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    /// Declared signature algorithm, exactly as written.
    pub alg: String,
    /// Key ID.
    #[serde(default)]
    pub kid: Option<String>,
    /// Media type, usually `JWT`.
    #[serde(default)]
    pub typ: Option<String>,
}

/// A token split and decoded, but not verified.
#[derive(Debug, Clone, PartialEq)]
pub struct UnverifiedToken {
    /// Decoded header.
    pub header: TokenHeader,
    /// Decoded payload.
    pub claims: Map<String, Value>,
}

/// Splits and decodes a compact JWS without verifying it.
///
/// The signature segment may be empty (as in `alg: none` tokens) so the
/// algorithm check, not the parser, rejects such tokens.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the token is too long, does not
/// have exactly three segments, a segment is not base64url, or the header
/// or payload is not a JSON object.
pub fn parse_unverified(token: &str) -> Result<UnverifiedToken> {
    if token.len() > MAX_TOKEN_LENGTH {
        return Err(AuthError::malformed_token(format!(
            "token exceeds {MAX_TOKEN_LENGTH} bytes"
        )));
    }

    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return Err(AuthError::malformed_token("JWT must have 3 parts separated by dots"));
    };
    if header.is_empty() || payload.is_empty() {
        return Err(AuthError::malformed_token("JWT header and payload cannot be empty"));
    }

    let header_bytes = decode_segment(header, "header")?;
    let payload_bytes = decode_segment(payload, "payload")?;
    decode_segment(signature, "signature")?;

    let header: TokenHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
        AuthError::malformed_token(format!("failed to parse JWT header: {e}"))
    })?;
    let claims: Map<String, Value> = serde_json::from_slice(&payload_bytes).map_err(|e| {
        AuthError::malformed_token(format!("failed to parse JWT claims: {e}"))
    })?;

    Ok(UnverifiedToken { header, claims })
}

fn decode_segment(segment: &str, name: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::malformed_token(format!("failed to decode JWT {name}: {e}")))
}

/// Identity established by a successfully validated token.
///
/// Constructed only by [`TokenValidator`]; fields are read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPrincipal {
    subject: String,
    issuer: String,
    audiences: Vec<String>,
    expires_at: DateTime<Utc>,
    claims: Map<String, Value>,
}

impl ValidatedPrincipal {
    /// The `sub` claim.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The `iss` claim.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The `aud` claim, normalised to a list.
    #[must_use]
    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    /// The `exp` claim.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Every claim in the token.
    #[must_use]
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// A single claim by name.
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Scopes from the space-separated `scope` claim.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.claims
            .get("scope")
            .and_then(Value::as_str)
            .map(|scope| scope.split_whitespace().collect())
            .unwrap_or_default()
    }
}

/// Checks registered claims of a signature-verified payload.
///
/// `now` is seconds since the Unix epoch. Claims are checked in the order
/// `iss`, `aud`, `exp`, `nbf`, `sub`.
///
/// # Errors
///
/// Returns [`AuthError::ClaimValidation`] naming the first claim that fails.
pub(crate) fn check_claims(
    claims: Map<String, Value>,
    expected_issuer: &str,
    expected_audience: &str,
    clock_skew: Duration,
    now: i64,
) -> Result<ValidatedPrincipal> {
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(i64::MAX);

    let issuer = match claims.get("iss").and_then(Value::as_str) {
        Some(iss) if issuers_match(iss, expected_issuer) => iss.to_owned(),
        Some(iss) => {
            return Err(AuthError::claim_validation(
                "iss",
                format!("expected '{expected_issuer}', got '{iss}'"),
            ));
        },
        None => return Err(AuthError::claim_validation("iss", "missing or not a string")),
    };

    let audiences = match claims.get("aud") {
        Some(Value::String(aud)) => vec![aud.clone()],
        Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).map(str::to_owned).collect(),
        _ => return Err(AuthError::claim_validation("aud", "missing or not a string or array")),
    };
    if !audiences.iter().any(|aud| aud == expected_audience) {
        return Err(AuthError::claim_validation(
            "aud",
            format!("expected audience '{expected_audience}' not present"),
        ));
    }

    let exp = numeric_date(&claims, "exp")?
        .ok_or_else(|| AuthError::claim_validation("exp", "missing"))?;
    if exp.saturating_add(skew) <= now {
        return Err(AuthError::claim_validation("exp", "token expired"));
    }

    if let Some(nbf) = numeric_date(&claims, "nbf")?
        && nbf > now.saturating_add(skew)
    {
        return Err(AuthError::claim_validation("nbf", "token not yet valid"));
    }

    let subject = match claims.get("sub").and_then(Value::as_str) {
        Some(sub) if !sub.is_empty() => sub.to_owned(),
        _ => return Err(AuthError::claim_validation("sub", "missing or not a string")),
    };

    let expires_at = DateTime::from_timestamp(exp, 0)
        .ok_or_else(|| AuthError::claim_validation("exp", "out of range"))?;

    Ok(ValidatedPrincipal { subject, issuer, audiences, expires_at, claims })
}

/// Reads a NumericDate claim; fractional seconds are truncated.
fn numeric_date(claims: &Map<String, Value>, name: &'static str) -> Result<Option<i64>> {
    match claims.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| AuthError::claim_validation(name, "not a numeric date")),
    }
}

/// Validates bearer tokens issued by one authority.
///
/// Holds no per-request state; share it behind an `Arc` and call it from as
/// many tasks as needed.
#[derive(Debug)]
pub struct TokenValidator {
    keys: Arc<SigningKeyCache>,
    algorithms: AlgorithmPolicy,
    audience: String,
    clock_skew: Duration,
}

impl TokenValidator {
    /// Creates a validator over an existing key cache.
    #[must_use]
    pub fn new(
        keys: Arc<SigningKeyCache>,
        algorithms: AlgorithmPolicy,
        audience: impl Into<String>,
    ) -> Self {
        Self { keys, algorithms, audience: audience.into(), clock_skew: DEFAULT_CLOCK_SKEW }
    }

    /// Overrides the default clock skew.
    #[must_use]
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// Builds the resolver, key cache and validator described by `config`.
    ///
    /// # Errors
    ///
    /// Returns any [`AuthnConfig::validate`] error.
    pub fn from_config(config: &AuthnConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        config.validate()?;
        let resolver = Arc::new(MetadataResolver::with_options(
            Arc::clone(&transport),
            config.allow_insecure_http(),
            config.http_timeout(),
        ));
        let keys = Arc::new(SigningKeyCache::with_options(
            resolver,
            transport,
            config.authority().clone(),
            config.jwks_ttl(),
            config.unknown_kid_debounce(),
            config.http_timeout(),
        ));
        let algorithms = AlgorithmPolicy::new(config.allowed_algorithms())?;
        Ok(Self::new(keys, algorithms, config.audience()).with_clock_skew(config.clock_skew()))
    }

    /// The key cache this validator reads.
    #[must_use]
    pub fn keys(&self) -> &Arc<SigningKeyCache> {
        &self.keys
    }

    /// Validates `token` against the configured audience and clock skew.
    ///
    /// # Errors
    ///
    /// See [`validate_with`](Self::validate_with).
    pub async fn validate(&self, token: &str) -> Result<ValidatedPrincipal> {
        self.validate_with(token, &self.audience, self.clock_skew).await
    }

    /// Validates `token` for `expected_audience`, tolerating `allowed_clock_skew`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`] for structural problems or a missing `kid`
    /// - [`AuthError::UnsupportedAlgorithm`] if `alg` is not allowed, or does
    ///   not match the algorithm the key is bound to
    /// - [`AuthError::UnknownKey`] if no key with the `kid` exists
    /// - [`AuthError::InvalidSignature`] if the signature does not verify
    /// - [`AuthError::ClaimValidation`] naming the failed claim
    /// - metadata and JWKS errors from the key cache
    #[tracing::instrument(
        skip(self, token, allowed_clock_skew),
        fields(kid = tracing::field::Empty, alg = tracing::field::Empty)
    )]
    pub async fn validate_with(
        &self,
        token: &str,
        expected_audience: &str,
        allowed_clock_skew: Duration,
    ) -> Result<ValidatedPrincipal> {
        // 1. Structure
        let unverified = parse_unverified(token)?;
        let span = tracing::Span::current();
        span.record("alg", unverified.header.alg.as_str());

        // 2. Algorithm allow-list, strictly before any key lookup
        let algorithm = self.algorithms.check(&unverified.header.alg)?;
        let kid = unverified
            .header
            .kid
            .as_deref()
            .ok_or_else(|| AuthError::malformed_token("JWT header missing 'kid' field"))?;
        validate_kid(kid)?;
        span.record("kid", kid);

        // 3. Key lookup
        let key = self.keys.get_key(kid).await?;
        if let Some(bound) = key.algorithm()
            && bound != algorithm
        {
            return Err(AuthError::unsupported_algorithm(format!(
                "key '{kid}' is bound to {bound:?}, token declares {algorithm:?}"
            )));
        }

        // 4. Signature
        let claims = verify_signature(token, key.decoding_key(), algorithm)?;

        // 5. Claims
        let metadata = self.keys.metadata().await?;
        let principal = check_claims(
            claims,
            metadata.issuer(),
            expected_audience,
            allowed_clock_skew,
            Utc::now().timestamp(),
        )?;

        tracing::debug!(subject = %principal.subject(), "token validated");
        Ok(principal)
    }
}

/// Verifies the signature only; registered claims are checked by [`check_claims`].
fn verify_signature(
    token: &str,
    key: &jsonwebtoken::DecodingKey,
    algorithm: Algorithm,
) -> Result<Map<String, Value>> {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<Map<String, Value>>(token, key, &validation)?;
    Ok(data.claims)
}
