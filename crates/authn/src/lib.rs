//! # Tollgate Authentication
//!
//! Bearer-token validation for services that trust a remote OpenID Connect
//! authority.
//!
//! This crate provides:
//! - **Metadata resolution**: discovery documents fetched once per authority and cached
//! - **Signing key cache**: JWKS keys with TTL, debounced refresh on unknown `kid`
//! - **Token validation**: algorithm allow-list, signature and registered claims
//! - **Route policy**: secure-by-default table of anonymous routes
//! - **Bearer gate**: the ordered per-request pipeline built from the above
//!
//! ## Features
//!
//! - Only asymmetric algorithms (RS256, ES256, EdDSA, ...) are accepted
//! - Symmetric algorithms (HS256, etc.) and `none` are explicitly rejected
//! - Concurrent cache misses share a single outbound fetch
//! - Plain-HTTP authorities are refused unless insecure mode is enabled
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tollgate_authn::{AuthnConfig, BearerGate, ReqwestTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthnConfig::builder()
//!     .authority("https://auth.example.com/realms/demo")
//!     .audience("greeting-api")
//!     .anonymous_routes(vec!["/health".to_owned()])
//!     .build()?;
//!
//! let transport = Arc::new(ReqwestTransport::new(config.http_timeout())?);
//! let gate = BearerGate::from_config(&config, transport)?;
//!
//! let outcome = gate.authenticate("/greeting", Some("Bearer eyJhbGciOi...")).await?;
//! if let Some(principal) = outcome.principal() {
//!     println!("hello, {}", principal.subject());
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Validator configuration.
pub mod config;
/// Authentication error types.
pub mod error;
/// Request coalescing for cache fills.
pub mod flight;
/// Per-request authentication pipeline.
pub mod gate;
/// JWT parsing, validation and principals.
pub mod jwt;
/// Authority metadata discovery.
pub mod metadata;
/// Route authorization policy.
pub mod policy;
/// JWKS-backed signing key cache.
pub mod signing_key_cache;
/// Outbound HTTP transport.
pub mod transport;
/// Algorithm and header validation.
pub mod validation;

/// Test helpers (requires the `testutil` feature).
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

// Re-export key types for convenience
pub use config::AuthnConfig;
pub use error::{AuthError, ErrorCategory, Result};
pub use flight::SingleFlight;
pub use gate::{AuthOutcome, BearerGate, Rejection, extract_bearer};
pub use jwt::{TokenValidator, ValidatedPrincipal};
pub use metadata::{AuthorityMetadata, MetadataResolver};
pub use policy::{AuthRequirement, RoutePolicy};
pub use signing_key_cache::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL, SigningKey, SigningKeyCache};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport, TransportError};
pub use validation::{AlgorithmPolicy, DEFAULT_ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS};
