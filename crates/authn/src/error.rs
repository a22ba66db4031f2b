//! Authentication error types.
//!
//! Every failure in the token pipeline maps to one [`AuthError`] variant. The
//! variants fall into four [`ErrorCategory`] classes so operators can tell an
//! authority outage apart from a forged or expired credential:
//!
//! - [`ErrorCategory::Infrastructure`] - network, timeout or upstream availability failures
//! - [`ErrorCategory::Protocol`] - the authority answered, but with something unusable
//! - [`ErrorCategory::Credential`] - the presented token or grant was refused
//! - [`ErrorCategory::Configuration`] - local settings are invalid
//!
//! # Example
//!
//! ```
//! use tollgate_authn::{AuthError, ErrorCategory};
//!
//! let err = AuthError::claim_validation("exp", "token expired");
//! assert_eq!(err.category(), ErrorCategory::Credential);
//! assert!(!err.is_transient());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A shareable error type for source chain tracking.
///
/// `Arc` rather than `Box` so [`AuthError`] stays `Clone` and a single
/// in-flight fetch can hand the same failure to every waiter.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Coarse classification of an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The authority or resource server could not be reached in time.
    Infrastructure,
    /// The authority responded with a document that cannot be used.
    Protocol,
    /// The token or grant itself was rejected.
    Credential,
    /// Local configuration is invalid.
    Configuration,
}

impl ErrorCategory {
    /// Stable lowercase name, suitable for log fields and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Infrastructure => "infrastructure",
            Self::Protocol => "protocol",
            Self::Credential => "credential",
            Self::Configuration => "configuration",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication and token acquisition errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]` so new variants can be added in
/// minor releases. Downstream match expressions must include a wildcard arm.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Configuration rejected at build time.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        message: String,
    },

    /// A URL uses plain `http` while insecure transport is disabled.
    #[error("Insecure transport refused for {url}")]
    InsecureTransport {
        /// The offending URL.
        url: String,
    },

    /// The discovery document could not be fetched.
    #[error("Metadata fetch failed for {authority}: {message}")]
    MetadataFetch {
        /// Authority whose metadata was requested.
        authority: String,
        /// Description of the failure.
        message: String,
        /// The transport error, when there is one.
        #[source]
        source: Option<BoxError>,
    },

    /// The discovery document was fetched but is unusable.
    #[error("Metadata parse failed for {authority}: {message}")]
    MetadataParse {
        /// Authority whose metadata was requested.
        authority: String,
        /// Description of the parse failure.
        message: String,
    },

    /// The discovery document names a different issuer than the configured authority.
    #[error("Authority mismatch: expected issuer {expected}, got {actual}")]
    AuthorityMismatch {
        /// Configured authority.
        expected: String,
        /// Issuer published by the discovery document.
        actual: String,
    },

    /// The key set could not be fetched.
    #[error("JWKS fetch failed for {url}: {message}")]
    JwksFetch {
        /// JWKS endpoint.
        url: String,
        /// Description of the failure.
        message: String,
        /// The transport error, when there is one.
        #[source]
        source: Option<BoxError>,
    },

    /// The key set was fetched but is not a JSON Web Key Set.
    #[error("JWKS parse failed for {url}: {message}")]
    JwksParse {
        /// JWKS endpoint.
        url: String,
        /// Description of the parse failure.
        message: String,
    },

    /// No signing key with this `kid` exists, even after a refresh.
    #[error("Unknown signing key: {kid}")]
    UnknownKey {
        /// Key ID from the token header.
        kid: String,
    },

    /// The token's algorithm is not permitted.
    #[error("Unsupported algorithm: {message}")]
    UnsupportedAlgorithm {
        /// Description naming the rejected algorithm.
        message: String,
    },

    /// The token is not a structurally valid compact JWS.
    #[error("Malformed token: {message}")]
    MalformedToken {
        /// Description of the structural problem.
        message: String,
    },

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// A claim check failed.
    #[error("Claim validation failed for '{claim}': {message}")]
    ClaimValidation {
        /// Name of the claim that failed (`iss`, `aud`, `exp`, `nbf`, `sub`).
        claim: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// The token endpoint refused the grant.
    #[error("Grant rejected with HTTP {status}: {body}")]
    GrantRejected {
        /// HTTP status returned by the token endpoint.
        status: u16,
        /// Response body as returned by the authority.
        body: String,
    },

    /// The token endpoint could not be reached.
    #[error("Token endpoint unreachable at {url}: {message}")]
    TokenEndpointUnreachable {
        /// Token endpoint.
        url: String,
        /// Description of the failure.
        message: String,
        /// The transport error, when there is one.
        #[source]
        source: Option<BoxError>,
    },

    /// A cached access token is past its expiry and cannot be relayed.
    #[error("Access token expired")]
    TokenExpired,

    /// The downstream resource server could not be reached.
    #[error("Resource unreachable at {url}: {message}")]
    ResourceUnreachable {
        /// Requested resource URL.
        url: String,
        /// Description of the failure.
        message: String,
        /// The transport error, when there is one.
        #[source]
        source: Option<BoxError>,
    },

    /// Unexpected internal failure.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidConfig` error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    /// Creates a new `InsecureTransport` error.
    #[must_use]
    pub fn insecure_transport(url: impl Into<String>) -> Self {
        Self::InsecureTransport { url: url.into() }
    }

    /// Creates a new `MetadataFetch` error.
    #[must_use]
    pub fn metadata_fetch(authority: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MetadataFetch { authority: authority.into(), message: message.into(), source: None }
    }

    /// Creates a new `MetadataFetch` error with a source error.
    #[must_use]
    pub fn metadata_fetch_with_source(
        authority: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::MetadataFetch {
            authority: authority.into(),
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Creates a new `MetadataParse` error.
    #[must_use]
    pub fn metadata_parse(authority: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MetadataParse { authority: authority.into(), message: message.into() }
    }

    /// Creates a new `AuthorityMismatch` error.
    #[must_use]
    pub fn authority_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::AuthorityMismatch { expected: expected.into(), actual: actual.into() }
    }

    /// Creates a new `JwksFetch` error.
    #[must_use]
    pub fn jwks_fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::JwksFetch { url: url.into(), message: message.into(), source: None }
    }

    /// Creates a new `JwksFetch` error with a source error.
    #[must_use]
    pub fn jwks_fetch_with_source(
        url: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::JwksFetch { url: url.into(), message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `JwksParse` error.
    #[must_use]
    pub fn jwks_parse(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::JwksParse { url: url.into(), message: message.into() }
    }

    /// Creates a new `UnknownKey` error.
    #[must_use]
    pub fn unknown_key(kid: impl Into<String>) -> Self {
        Self::UnknownKey { kid: kid.into() }
    }

    /// Creates a new `UnsupportedAlgorithm` error.
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm { message: message.into() }
    }

    /// Creates a new `MalformedToken` error.
    #[must_use]
    pub fn malformed_token(message: impl Into<String>) -> Self {
        Self::MalformedToken { message: message.into() }
    }

    /// Creates a new `InvalidSignature` error.
    #[must_use]
    pub fn invalid_signature() -> Self {
        Self::InvalidSignature
    }

    /// Creates a new `ClaimValidation` error for the named claim.
    #[must_use]
    pub fn claim_validation(claim: &'static str, message: impl Into<String>) -> Self {
        Self::ClaimValidation { claim, message: message.into() }
    }

    /// Creates a new `GrantRejected` error.
    #[must_use]
    pub fn grant_rejected(status: u16, body: impl Into<String>) -> Self {
        Self::GrantRejected { status, body: body.into() }
    }

    /// Creates a new `TokenEndpointUnreachable` error.
    #[must_use]
    pub fn token_endpoint_unreachable(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TokenEndpointUnreachable { url: url.into(), message: message.into(), source: None }
    }

    /// Creates a new `TokenEndpointUnreachable` error with a source error.
    #[must_use]
    pub fn token_endpoint_unreachable_with_source(
        url: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TokenEndpointUnreachable {
            url: url.into(),
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Creates a new `TokenExpired` error.
    #[must_use]
    pub fn token_expired() -> Self {
        Self::TokenExpired
    }

    /// Creates a new `ResourceUnreachable` error with a source error.
    #[must_use]
    pub fn resource_unreachable_with_source(
        url: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ResourceUnreachable {
            url: url.into(),
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Returns the coarse class of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MetadataFetch { .. }
            | Self::JwksFetch { .. }
            | Self::TokenEndpointUnreachable { .. }
            | Self::ResourceUnreachable { .. }
            | Self::Internal { .. } => ErrorCategory::Infrastructure,
            Self::MetadataParse { .. } | Self::AuthorityMismatch { .. } | Self::JwksParse { .. } => {
                ErrorCategory::Protocol
            },
            Self::UnknownKey { .. }
            | Self::UnsupportedAlgorithm { .. }
            | Self::MalformedToken { .. }
            | Self::InvalidSignature
            | Self::ClaimValidation { .. }
            | Self::GrantRejected { .. }
            | Self::TokenExpired => ErrorCategory::Credential,
            Self::InvalidConfig { .. } | Self::InsecureTransport { .. } => {
                ErrorCategory::Configuration
            },
        }
    }

    /// Returns `true` when retrying later could succeed without any change
    /// to the token or configuration.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Infrastructure
    }

    /// Returns the failed claim name for `ClaimValidation` errors.
    #[must_use]
    pub fn failed_claim(&self) -> Option<&'static str> {
        match self {
            Self::ClaimValidation { claim, .. } => Some(claim),
            _ => None,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => AuthError::malformed_token("invalid JWT structure"),
            ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                AuthError::malformed_token(format!("JWT decoding failed: {err}"))
            },
            ErrorKind::InvalidAlgorithm => {
                AuthError::unsupported_algorithm("algorithm does not match the signing key")
            },
            ErrorKind::InvalidAlgorithmName | ErrorKind::MissingAlgorithm => {
                AuthError::unsupported_algorithm(format!("{err}"))
            },
            // Key-shape mismatches and bad signatures are indistinguishable to callers.
            _ => AuthError::InvalidSignature,
        }
    }
}
