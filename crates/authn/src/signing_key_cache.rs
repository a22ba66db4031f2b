//! JWKS-backed signing key cache for JWT validation.
//!
//! This module provides [`SigningKeyCache`], which resolves the authority's
//! `jwks_uri` through a [`MetadataResolver`] and keeps the parsed key set in
//! memory, so token validation does not hit the authorization server on
//! every request.
//!
//! # Architecture
//!
//! ```text
//! kid arrives → resolve metadata (cached) → jwks_uri
//!             → check key-set cache (TTL)
//!             → miss? single-flight cold load of the JWKS
//!             → kid present? return key
//!             → kid absent? forced refresh (single-flight, debounced)
//!             → still absent? UnknownKey
//! ```
//!
//! # Cache Strategy
//!
//! - **TTL**: default 300 seconds (5 minutes); an expired set is reloaded on next use
//! - **Forced refresh**: an unknown `kid` triggers at most one refresh per
//!   debounce window (default 10 seconds); concurrent misses share it
//! - **Invalidation**: [`SigningKeyCache::invalidate`] drops the set

use std::{
    collections::HashMap,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use fail::fail_point;
use jsonwebtoken::{
    Algorithm, DecodingKey,
    jwk::{AlgorithmParameters, Jwk, PublicKeyUse},
};
use moka::future::Cache;
use parking_lot::Mutex;
use serde::Deserialize;
use url::Url;

use crate::{
    config::{DEFAULT_JWKS_TTL, DEFAULT_UNKNOWN_KID_DEBOUNCE},
    error::{AuthError, Result},
    flight::SingleFlight,
    metadata::{AuthorityMetadata, MetadataResolver},
    transport::{DEFAULT_HTTP_TIMEOUT, HttpTransport, with_deadline},
};

/// Default cache TTL (5 minutes).
pub const DEFAULT_CACHE_TTL: Duration = DEFAULT_JWKS_TTL;

/// Default maximum number of key sets held.
pub const DEFAULT_CACHE_CAPACITY: u64 = 64;

/// One public key usable to verify token signatures.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    algorithm: Option<Algorithm>,
    key: DecodingKey,
    fetched_at: DateTime<Utc>,
}

impl SigningKey {
    /// Key ID.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithm the JWK is bound to, when it declared one.
    #[must_use]
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Verification key material.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    /// When the key set holding this key was fetched.
    #[must_use]
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("fetched_at", &self.fetched_at)
            .finish_non_exhaustive()
    }
}

/// A parsed JWKS, indexed by kid.
#[derive(Debug)]
struct KeySet {
    keys: HashMap<String, Arc<SigningKey>>,
}

#[derive(Deserialize)]
struct RawKeySet {
    keys: Vec<serde_json::Value>,
}

/// Cache for the signing keys published by one authority.
///
/// Share one instance (behind an `Arc`) between all validators for the same
/// authority; lookups from many tasks proceed concurrently and fills are
/// single-flight.
pub struct SigningKeyCache {
    /// Discovery, for the current `jwks_uri`.
    resolver: Arc<MetadataResolver>,
    /// Authority whose keys this cache holds.
    authority: Url,
    /// Outbound HTTP.
    transport: Arc<dyn HttpTransport>,
    /// Parsed key sets keyed by `jwks_uri`, with TTL-based expiration.
    key_sets: Cache<String, Arc<KeySet>>,
    /// Deduplicates concurrent loads of the same key set.
    flights: SingleFlight<String, Arc<KeySet>>,
    /// Start of the most recent forced refresh.
    last_forced_refresh: Arc<Mutex<Option<Instant>>>,
    /// Minimum spacing between forced refreshes.
    debounce: Duration,
    /// Bound on a single JWKS request.
    timeout: Duration,
    /// Number of JWKS requests issued.
    fetch_count: Arc<AtomicU64>,
}

impl SigningKeyCache {
    /// Creates a cache with the default TTL, debounce and timeout.
    #[must_use]
    pub fn new(
        resolver: Arc<MetadataResolver>,
        transport: Arc<dyn HttpTransport>,
        authority: Url,
    ) -> Self {
        Self::with_options(
            resolver,
            transport,
            authority,
            DEFAULT_CACHE_TTL,
            DEFAULT_UNKNOWN_KID_DEBOUNCE,
            DEFAULT_HTTP_TIMEOUT,
        )
    }

    /// Creates a cache with explicit TTL, unknown-kid debounce and call timeout.
    ///
    /// # Arguments
    ///
    /// * `ttl` - Lifetime of a fetched key set
    /// * `debounce` - Minimum spacing between refreshes forced by an unknown kid
    /// * `timeout` - Bound on a single JWKS request
    #[must_use]
    pub fn with_options(
        resolver: Arc<MetadataResolver>,
        transport: Arc<dyn HttpTransport>,
        authority: Url,
        ttl: Duration,
        debounce: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            authority,
            transport,
            key_sets: Cache::builder().time_to_live(ttl).max_capacity(DEFAULT_CACHE_CAPACITY).build(),
            flights: SingleFlight::new(),
            last_forced_refresh: Arc::new(Mutex::new(None)),
            debounce,
            timeout,
            fetch_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Authority whose keys this cache holds.
    #[must_use]
    pub fn authority(&self) -> &Url {
        &self.authority
    }

    /// Resolves the authority's metadata through the shared resolver.
    ///
    /// # Errors
    ///
    /// See [`MetadataResolver::resolve`].
    pub async fn metadata(&self) -> Result<Arc<AuthorityMetadata>> {
        self.resolver.resolve(&self.authority).await
    }

    /// Returns the signing key for `kid`.
    ///
    /// Loads the key set on first use. If the kid is absent from a set that
    /// was already cached, one forced refresh is attempted unless another
    /// forced refresh started within the debounce window.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UnknownKey`] if the kid is absent after the refresh, or
    ///   the refresh was debounced
    /// - [`AuthError::JwksFetch`] / [`AuthError::JwksParse`] if the key set
    ///   cannot be loaded
    /// - any [`MetadataResolver::resolve`] error
    #[tracing::instrument(skip(self))]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<SigningKey>> {
        let metadata = self.metadata().await?;
        let jwks_uri = metadata.jwks_uri().clone();
        let set_key = jwks_uri.as_str().to_owned();

        let (current, cold) = match self.key_sets.get(&set_key).await {
            Some(set) => {
                tracing::debug!(cache = "jwks", "cache hit");
                (set, false)
            },
            None => {
                tracing::debug!(cache = "jwks", "cache miss");
                (self.load(jwks_uri.clone(), None).await?, true)
            },
        };

        if let Some(key) = current.keys.get(kid) {
            return Ok(Arc::clone(key));
        }
        if cold {
            tracing::debug!("kid absent from freshly loaded key set");
            return Err(AuthError::unknown_key(kid));
        }

        tracing::debug!("kid absent from cached key set, refreshing");
        let refreshed = self.load(jwks_uri, Some(current)).await?;
        refreshed
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| AuthError::unknown_key(kid))
    }

    /// Loads the key set at `jwks_uri` through the single-flight executor.
    ///
    /// With `observed == None` this is a cold load. With `Some(set)` it is a
    /// forced refresh: if the cache already holds a different set (another
    /// task refreshed meanwhile) that set is used; if a forced refresh ran
    /// within the debounce window the observed set is returned unchanged.
    async fn load(&self, jwks_uri: Url, observed: Option<Arc<KeySet>>) -> Result<Arc<KeySet>> {
        let set_key = jwks_uri.as_str().to_owned();
        let key_sets = self.key_sets.clone();
        let transport = Arc::clone(&self.transport);
        let last_forced = Arc::clone(&self.last_forced_refresh);
        let fetch_count = Arc::clone(&self.fetch_count);
        let debounce = self.debounce;
        let timeout = self.timeout;

        self.flights
            .run(set_key.clone(), move || async move {
                let cached = key_sets.get(&set_key).await;
                match (&observed, cached) {
                    (None, Some(set)) => return Ok(set),
                    (Some(seen), Some(set)) if !Arc::ptr_eq(seen, &set) => return Ok(set),
                    _ => {},
                }

                if let Some(seen) = observed {
                    let mut last = last_forced.lock();
                    if last.is_some_and(|at| at.elapsed() < debounce) {
                        tracing::debug!("forced refresh debounced");
                        return Ok(seen);
                    }
                    *last = Some(Instant::now());
                }

                fetch_count.fetch_add(1, Ordering::Relaxed);
                let set = Arc::new(fetch_key_set(transport.as_ref(), &jwks_uri, timeout).await?);
                key_sets.insert(set_key, Arc::clone(&set)).await;
                Ok(set)
            })
            .await
    }

    /// Drops all cached key sets; the next lookup reloads.
    ///
    /// An audit event is emitted at INFO level for compliance tracking.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate(&self) {
        let evicted = self.key_sets.entry_count();
        self.key_sets.invalidate_all();
        tracing::info!(
            audit.action = "invalidate_cache",
            audit.resource = %self.authority,
            audit.result = "success",
            audit.evicted = evicted,
            "audit_event"
        );
    }

    /// Returns the number of cached key sets.
    ///
    /// Note: This count is eventually consistent. For accurate counts in tests,
    /// call `sync` first.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.key_sets.entry_count()
    }

    /// Returns how many JWKS requests this cache has issued.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// Flushes pending cache maintenance so counts are exact.
    pub async fn sync(&self) {
        self.key_sets.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for SigningKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyCache")
            .field("authority", &self.authority.as_str())
            .field("debounce", &self.debounce)
            .field("fetch_count", &self.fetch_count())
            .finish_non_exhaustive()
    }
}

#[tracing::instrument(skip(transport), fields(url = %jwks_uri))]
async fn fetch_key_set(
    transport: &dyn HttpTransport,
    jwks_uri: &Url,
    timeout: Duration,
) -> Result<KeySet> {
    fail_point!("jwks-before-fetch", |_| {
        Err(AuthError::jwks_fetch(jwks_uri.as_str(), "injected failure before JWKS fetch"))
    });

    tracing::info!("fetching JWKS");
    let response = with_deadline(timeout, transport.get(jwks_uri)).await.map_err(|err| {
        tracing::warn!(error = %err, "JWKS fetch failed");
        AuthError::jwks_fetch_with_source(jwks_uri.as_str(), "JWKS request failed", err)
    })?;

    if !response.is_success() {
        tracing::warn!(status = response.status, "JWKS endpoint returned an error status");
        return Err(AuthError::jwks_fetch(
            jwks_uri.as_str(),
            format!("JWKS endpoint returned HTTP {}", response.status),
        ));
    }

    parse_key_set(jwks_uri, &response.body)
}

/// Parses a JWKS body, skipping keys that cannot be used for verification.
fn parse_key_set(jwks_uri: &Url, body: &str) -> Result<KeySet> {
    let raw: RawKeySet = serde_json::from_str(body)
        .map_err(|e| AuthError::jwks_parse(jwks_uri.as_str(), format!("invalid JWKS: {e}")))?;

    let fetched_at = Utc::now();
    let mut keys = HashMap::with_capacity(raw.keys.len());
    for value in raw.keys {
        let jwk: Jwk = match serde_json::from_value(value) {
            Ok(jwk) => jwk,
            Err(err) => {
                tracing::debug!(error = %err, "skipping unparseable JWK");
                continue;
            },
        };
        match to_signing_key(&jwk, fetched_at) {
            Some(key) => {
                keys.insert(key.kid.clone(), Arc::new(key));
            },
            None => continue,
        }
    }

    tracing::debug!(keys = keys.len(), "parsed JWKS");
    Ok(KeySet { keys })
}

fn to_signing_key(jwk: &Jwk, fetched_at: DateTime<Utc>) -> Option<SigningKey> {
    let Some(kid) = jwk.common.key_id.clone() else {
        tracing::debug!("skipping JWK without kid");
        return None;
    };
    if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        tracing::debug!(kid, "skipping encryption key");
        return None;
    }
    if matches!(jwk.algorithm, AlgorithmParameters::OctetKey(_)) {
        tracing::debug!(kid, "skipping symmetric key");
        return None;
    }

    let algorithm = match &jwk.common.key_algorithm {
        Some(key_alg) => match Algorithm::from_str(&format!("{key_alg:?}")) {
            Ok(alg) => Some(alg),
            Err(_) => {
                tracing::debug!(kid, algorithm = ?key_alg, "skipping key with non-signing algorithm");
                return None;
            },
        },
        None => None,
    };

    match DecodingKey::from_jwk(jwk) {
        Ok(key) => Some(SigningKey { kid, algorithm, key, fetched_at }),
        Err(err) => {
            tracing::debug!(kid, error = %err, "skipping unconvertible JWK");
            None
        },
    }
}
