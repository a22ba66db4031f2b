//! OpenID Connect discovery.
//!
//! [`MetadataResolver`] fetches `{authority}/.well-known/openid-configuration`
//! once per authority and keeps the result until it is explicitly
//! invalidated. There is no background polling.
//!
//! # Architecture
//!
//! ```text
//! resolve(authority) → check transport rule (https, or http in insecure mode)
//!                    → check cache
//!                    → miss? single-flight fetch of the discovery document
//!                    → verify issuer == authority, endpoint transport rules
//!                    → cache and return
//! ```

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use fail::fail_point;
use moka::future::Cache;
use serde::Deserialize;
use url::Url;

use crate::{
    error::{AuthError, Result},
    flight::SingleFlight,
    transport::{DEFAULT_HTTP_TIMEOUT, HttpTransport, check_transport, with_deadline},
};

/// Path of the discovery document relative to the authority.
pub const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// Maximum number of authorities held in the cache.
pub const DEFAULT_METADATA_CAPACITY: u64 = 64;

/// Published configuration of an authorization server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityMetadata {
    issuer: String,
    jwks_uri: Url,
    token_endpoint: Url,
    signing_algorithms: Vec<String>,
    grant_types: Vec<String>,
    fetched_at: DateTime<Utc>,
}

impl AuthorityMetadata {
    /// Issuer identifier exactly as published.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Location of the JSON Web Key Set.
    #[must_use]
    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    /// OAuth 2.0 token endpoint.
    #[must_use]
    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    /// Advertised `id_token_signing_alg_values_supported`, if any.
    #[must_use]
    pub fn signing_algorithms(&self) -> &[String] {
        &self.signing_algorithms
    }

    /// Advertised `grant_types_supported`, if any.
    #[must_use]
    pub fn grant_types(&self) -> &[String] {
        &self.grant_types
    }

    /// When the document was fetched.
    #[must_use]
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    jwks_uri: String,
    token_endpoint: String,
    #[serde(default)]
    id_token_signing_alg_values_supported: Vec<String>,
    #[serde(default)]
    grant_types_supported: Vec<String>,
}

/// Cache of discovery documents keyed by authority.
pub struct MetadataResolver {
    transport: Arc<dyn HttpTransport>,
    cache: Cache<String, Arc<AuthorityMetadata>>,
    flights: SingleFlight<String, Arc<AuthorityMetadata>>,
    allow_insecure_http: bool,
    timeout: Duration,
}

impl MetadataResolver {
    /// Creates a resolver that refuses plain `http`.
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_options(transport, false, DEFAULT_HTTP_TIMEOUT)
    }

    /// Creates a resolver with an explicit transport rule and call timeout.
    #[must_use]
    pub fn with_options(
        transport: Arc<dyn HttpTransport>,
        allow_insecure_http: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            cache: Cache::builder().max_capacity(DEFAULT_METADATA_CAPACITY).build(),
            flights: SingleFlight::new(),
            allow_insecure_http,
            timeout,
        }
    }

    /// Returns the metadata for `authority`, fetching it on first use.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InsecureTransport`] / [`AuthError::InvalidConfig`] if the
    ///   authority or a discovered endpoint breaks the transport rule
    /// - [`AuthError::MetadataFetch`] on network failure, timeout, or a non-2xx status
    /// - [`AuthError::MetadataParse`] if the document is not valid discovery JSON
    /// - [`AuthError::AuthorityMismatch`] if the published issuer differs from `authority`
    #[tracing::instrument(skip(self), fields(authority = %authority))]
    pub async fn resolve(&self, authority: &Url) -> Result<Arc<AuthorityMetadata>> {
        check_transport(authority, self.allow_insecure_http)?;
        let key = cache_key(authority);

        if let Some(metadata) = self.cache.get(&key).await {
            tracing::debug!(cache = "metadata", "cache hit");
            return Ok(metadata);
        }
        tracing::debug!(cache = "metadata", "cache miss");

        let cache = self.cache.clone();
        let transport = Arc::clone(&self.transport);
        let authority = authority.clone();
        let insecure = self.allow_insecure_http;
        let timeout = self.timeout;
        self.flights
            .run(key.clone(), move || async move {
                if let Some(metadata) = cache.get(&key).await {
                    return Ok(metadata);
                }
                let metadata =
                    Arc::new(fetch_metadata(transport.as_ref(), &authority, insecure, timeout).await?);
                cache.insert(key, Arc::clone(&metadata)).await;
                Ok(metadata)
            })
            .await
    }

    /// Drops the cached document for `authority`; the next resolve re-fetches.
    ///
    /// An audit event is emitted at INFO level.
    #[tracing::instrument(skip(self), fields(authority = %authority))]
    pub async fn invalidate(&self, authority: &Url) {
        self.cache.invalidate(&cache_key(authority)).await;
        tracing::info!(
            audit.action = "invalidate_metadata",
            audit.resource = %authority,
            audit.result = "success",
            "audit_event"
        );
    }

    /// Returns the number of cached documents (eventually consistent).
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Flushes pending cache maintenance so counts are exact.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for MetadataResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataResolver")
            .field("allow_insecure_http", &self.allow_insecure_http)
            .field("timeout", &self.timeout)
            .field("entries", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

fn cache_key(authority: &Url) -> String {
    authority.as_str().trim_end_matches('/').to_string()
}

/// Builds the discovery URL, keeping any path on the authority
/// (`/realms/demo` stays in front of the well-known suffix).
fn discovery_url(authority: &Url) -> Result<Url> {
    let base = authority.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/{DISCOVERY_PATH}"))
        .map_err(|e| AuthError::invalid_config(format!("cannot build discovery URL: {e}")))
}

/// Compares issuers exactly, except for a single trailing `/`.
pub(crate) fn issuers_match(published: &str, expected: &str) -> bool {
    let strip = |s: &str| s.strip_suffix('/').unwrap_or(s).to_owned();
    strip(published) == strip(expected)
}

async fn fetch_metadata(
    transport: &dyn HttpTransport,
    authority: &Url,
    allow_insecure_http: bool,
    timeout: Duration,
) -> Result<AuthorityMetadata> {
    let url = discovery_url(authority)?;

    fail_point!("metadata-before-fetch", |_| {
        Err(AuthError::metadata_fetch(authority.as_str(), "injected failure before discovery fetch"))
    });

    tracing::info!(url = %url, "fetching discovery document");
    let response = with_deadline(timeout, transport.get(&url)).await.map_err(|err| {
        tracing::warn!(error = %err, "discovery fetch failed");
        AuthError::metadata_fetch_with_source(authority.as_str(), "discovery request failed", err)
    })?;

    if !response.is_success() {
        tracing::warn!(status = response.status, "discovery endpoint returned an error status");
        return Err(AuthError::metadata_fetch(
            authority.as_str(),
            format!("discovery endpoint returned HTTP {}", response.status),
        ));
    }

    let document: DiscoveryDocument = serde_json::from_str(&response.body).map_err(|e| {
        AuthError::metadata_parse(authority.as_str(), format!("invalid discovery document: {e}"))
    })?;

    if !issuers_match(&document.issuer, authority.as_str()) {
        tracing::warn!(issuer = %document.issuer, "discovery issuer does not match authority");
        return Err(AuthError::authority_mismatch(authority.as_str(), document.issuer));
    }

    let jwks_uri = parse_endpoint(authority, "jwks_uri", &document.jwks_uri)?;
    check_transport(&jwks_uri, allow_insecure_http)?;
    let token_endpoint = parse_endpoint(authority, "token_endpoint", &document.token_endpoint)?;
    check_transport(&token_endpoint, allow_insecure_http)?;

    Ok(AuthorityMetadata {
        issuer: document.issuer,
        jwks_uri,
        token_endpoint,
        signing_algorithms: document.id_token_signing_alg_values_supported,
        grant_types: document.grant_types_supported,
        fetched_at: Utc::now(),
    })
}

fn parse_endpoint(authority: &Url, field: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| {
        AuthError::metadata_parse(authority.as_str(), format!("{field} '{value}' is not a URL: {e}"))
    })
}
