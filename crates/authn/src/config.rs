//! Resource-server authentication settings.
//!
//! [`AuthnConfig`] can be built in code through its validating builder or
//! deserialised from any serde format; durations use humantime strings
//! (`"5m"`, `"10s"`). A deserialised config must be checked with
//! [`AuthnConfig::validate`] before use (the `from_config` constructors do
//! this for you).
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tollgate_authn::AuthnConfig;
//!
//! let config = AuthnConfig::builder()
//!     .authority("https://auth.example.com/realms/demo")
//!     .audience("account")
//!     .clock_skew(Duration::from_secs(60))
//!     .anonymous_routes(vec!["/health".to_string()])
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.audience(), "account");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::{AuthError, Result},
    transport::{DEFAULT_HTTP_TIMEOUT, check_transport},
    validation::{AlgorithmPolicy, DEFAULT_ACCEPTED_ALGORITHMS},
};

/// Default tolerance when comparing `exp`/`nbf` to the local clock (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Default lifetime of a fetched key set (5 minutes).
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(300);

/// Default minimum spacing between forced key-set refreshes (10 seconds).
pub const DEFAULT_UNKNOWN_KID_DEBOUNCE: Duration = Duration::from_secs(10);

fn default_algorithms() -> Vec<String> {
    DEFAULT_ACCEPTED_ALGORITHMS.iter().map(|alg| (*alg).to_string()).collect()
}

fn default_clock_skew() -> Duration {
    DEFAULT_CLOCK_SKEW
}

fn default_http_timeout() -> Duration {
    DEFAULT_HTTP_TIMEOUT
}

fn default_jwks_ttl() -> Duration {
    DEFAULT_JWKS_TTL
}

fn default_unknown_kid_debounce() -> Duration {
    DEFAULT_UNKNOWN_KID_DEBOUNCE
}

/// Settings for validating bearer tokens issued by one authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthnConfig {
    /// Expected authority (issuer) URL; discovery lives under it.
    authority: Url,
    /// Audience every accepted token must carry.
    audience: String,
    /// Permitted JWS algorithms.
    #[serde(default = "default_algorithms")]
    allowed_algorithms: Vec<String>,
    /// Tolerance applied to `exp` and `nbf`.
    #[serde(default = "default_clock_skew", with = "humantime_serde")]
    clock_skew: Duration,
    /// Permit plain `http` for the authority and its endpoints.
    #[serde(default)]
    allow_insecure_http: bool,
    /// Bound on each outbound call.
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    http_timeout: Duration,
    /// Lifetime of a fetched key set.
    #[serde(default = "default_jwks_ttl", with = "humantime_serde")]
    jwks_ttl: Duration,
    /// Minimum spacing between forced key-set refreshes.
    #[serde(default = "default_unknown_kid_debounce", with = "humantime_serde")]
    unknown_kid_debounce: Duration,
    /// Routes served without a token.
    #[serde(default)]
    anonymous_routes: Vec<String>,
    /// Routes that always require a token, even when an anonymous pattern matches.
    #[serde(default)]
    protected_routes: Vec<String>,
}

#[bon::bon]
impl AuthnConfig {
    /// Creates a new configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if:
    /// - `authority` is not an absolute `http(s)` URL
    /// - `audience` is empty
    /// - `allowed_algorithms` is empty or names a forbidden or unknown algorithm
    /// - `http_timeout` or `jwks_ttl` is zero
    ///
    /// Returns [`AuthError::InsecureTransport`] if `authority` is plain `http`
    /// and `allow_insecure_http` is not set.
    #[builder]
    pub fn new(
        #[builder(into)] authority: String,
        #[builder(into)] audience: String,
        #[builder(default = default_algorithms())] allowed_algorithms: Vec<String>,
        #[builder(default = DEFAULT_CLOCK_SKEW)] clock_skew: Duration,
        #[builder(default)] allow_insecure_http: bool,
        #[builder(default = DEFAULT_HTTP_TIMEOUT)] http_timeout: Duration,
        #[builder(default = DEFAULT_JWKS_TTL)] jwks_ttl: Duration,
        #[builder(default = DEFAULT_UNKNOWN_KID_DEBOUNCE)] unknown_kid_debounce: Duration,
        #[builder(default)] anonymous_routes: Vec<String>,
        #[builder(default)] protected_routes: Vec<String>,
    ) -> Result<Self> {
        let authority = Url::parse(&authority)
            .map_err(|e| AuthError::invalid_config(format!("authority '{authority}': {e}")))?;
        let config = Self {
            authority,
            audience,
            allowed_algorithms,
            clock_skew,
            allow_insecure_http,
            http_timeout,
            jwks_ttl,
            unknown_kid_debounce,
            anonymous_routes,
            protected_routes,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the builder enforces; call after deserialising.
    ///
    /// # Errors
    ///
    /// See [`AuthnConfig::new`].
    pub fn validate(&self) -> Result<()> {
        check_transport(&self.authority, self.allow_insecure_http)?;
        if self.audience.trim().is_empty() {
            return Err(AuthError::invalid_config("audience cannot be empty"));
        }
        AlgorithmPolicy::new(&self.allowed_algorithms)?;
        if self.http_timeout.is_zero() {
            return Err(AuthError::invalid_config("http_timeout must be greater than zero"));
        }
        if self.jwks_ttl.is_zero() {
            return Err(AuthError::invalid_config("jwks_ttl must be greater than zero"));
        }
        Ok(())
    }

    /// Returns the expected authority.
    #[must_use]
    pub fn authority(&self) -> &Url {
        &self.authority
    }

    /// Returns the expected audience.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Returns the permitted algorithm names.
    #[must_use]
    pub fn allowed_algorithms(&self) -> &[String] {
        &self.allowed_algorithms
    }

    /// Returns the clock skew tolerance.
    #[must_use]
    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    /// Returns whether plain `http` is permitted.
    #[must_use]
    pub fn allow_insecure_http(&self) -> bool {
        self.allow_insecure_http
    }

    /// Returns the per-call timeout.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    /// Returns the key set lifetime.
    #[must_use]
    pub fn jwks_ttl(&self) -> Duration {
        self.jwks_ttl
    }

    /// Returns the forced-refresh debounce window.
    #[must_use]
    pub fn unknown_kid_debounce(&self) -> Duration {
        self.unknown_kid_debounce
    }

    /// Returns the anonymous route patterns.
    #[must_use]
    pub fn anonymous_routes(&self) -> &[String] {
        &self.anonymous_routes
    }

    /// Returns the explicitly protected route patterns.
    #[must_use]
    pub fn protected_routes(&self) -> &[String] {
        &self.protected_routes
    }
}
