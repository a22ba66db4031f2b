//! Token acquisition against the authority's token endpoint.
//!
//! [`TokenClient`] exchanges a [`Grant`] for an access token and keeps the
//! result until its refresh point. Callers that need a token for the same
//! credential identity while an exchange is running join that exchange.
//!
//! ```text
//! acquire(grant) ─► cache hit? ─► token
//!                      │ miss / past refresh point
//!                      ▼
//!        token endpoint (override or discovery)
//!                      ▼
//!        SingleFlight(identity) ─► POST form ─► CachedToken ─► cache
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use chrono::Utc;
use moka::{Expiry, future::Cache};
use tollgate_authn::{
    AuthError, MetadataResolver, Result, SingleFlight,
    transport::{HttpTransport, with_deadline},
};
use url::Url;

use crate::{
    config::ClientConfig,
    grant::{ClientCredentials, Grant},
    token::CachedToken,
};

/// Upper bound on distinct credential identities held at once.
pub const DEFAULT_TOKEN_CAPACITY: u64 = 1_000;

/// Longest a token is held, whatever lifetime the authority grants.
const MAX_TOKEN_HOLD: Duration = Duration::from_secs(24 * 60 * 60);

/// Evicts each token at its own refresh point.
struct UntilRefresh;

impl Expiry<String, CachedToken> for UntilRefresh {
    fn expire_after_create(
        &self,
        _key: &String,
        token: &CachedToken,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(token.time_to_refresh().min(MAX_TOKEN_HOLD))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        token: &CachedToken,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(token.time_to_refresh().min(MAX_TOKEN_HOLD))
    }
}

/// Acquires and caches access tokens for one client.
pub struct TokenClient {
    transport: Arc<dyn HttpTransport>,
    resolver: MetadataResolver,
    authority: Url,
    token_endpoint: Option<Url>,
    credentials: ClientCredentials,
    refresh_margin: Duration,
    timeout: Duration,
    cache: Cache<String, CachedToken>,
    flights: SingleFlight<String, CachedToken>,
    exchanges: Arc<AtomicU64>,
}

impl TokenClient {
    /// Creates a client for the identity in `config`, talking to the
    /// authority through `transport`.
    ///
    /// # Errors
    ///
    /// Returns the error from [`ClientConfig::validate`] if `config` breaks
    /// an invariant, which can happen when it was deserialised.
    pub fn new(config: &ClientConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        config.validate()?;

        let resolver = MetadataResolver::with_options(
            Arc::clone(&transport),
            config.allow_insecure_http(),
            config.http_timeout(),
        );
        Ok(Self {
            transport,
            resolver,
            authority: config.authority().clone(),
            token_endpoint: config.token_endpoint().cloned(),
            credentials: ClientCredentials::new(config.client_id(), config.client_secret()),
            refresh_margin: config.refresh_margin(),
            timeout: config.http_timeout(),
            cache: Cache::builder()
                .max_capacity(DEFAULT_TOKEN_CAPACITY)
                .expire_after(UntilRefresh)
                .build(),
            flights: SingleFlight::new(),
            exchanges: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The configured client identity.
    #[must_use]
    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    /// Returns a token for `grant` using the configured client identity.
    ///
    /// # Errors
    ///
    /// See [`TokenClient::acquire_with`].
    pub async fn acquire(&self, grant: &Grant) -> Result<CachedToken> {
        self.acquire_with(grant, &self.credentials).await
    }

    /// Returns a token for `grant` presented with `credentials`.
    ///
    /// A cached token is returned until its refresh point; after that, or on
    /// first use, one exchange runs per credential identity and every
    /// concurrent caller receives its result.
    ///
    /// # Errors
    ///
    /// - [`AuthError::GrantRejected`] if the authority refuses the grant or
    ///   answers with something other than a bearer token response
    /// - [`AuthError::TokenEndpointUnreachable`] on network failure or timeout
    /// - metadata errors from discovery when no endpoint override is set
    #[tracing::instrument(
        skip(self, grant, credentials),
        fields(grant = grant.kind(), client_id = credentials.client_id())
    )]
    pub async fn acquire_with(
        &self,
        grant: &Grant,
        credentials: &ClientCredentials,
    ) -> Result<CachedToken> {
        let identity = grant.identity(credentials.client_id());

        if let Some(token) = self.cached(&identity).await {
            tracing::debug!(cache = "token", "cache hit");
            return Ok(token);
        }
        tracing::debug!(cache = "token", "cache miss");

        let endpoint = self.token_endpoint().await?;
        let cache = self.cache.clone();
        let transport = Arc::clone(&self.transport);
        let exchanges = Arc::clone(&self.exchanges);
        let grant = grant.clone();
        let credentials = credentials.clone();
        let margin = self.refresh_margin;
        let timeout = self.timeout;
        self.flights
            .run(identity.clone(), move || async move {
                if let Some(token) = cache.get(&identity).await
                    && !token.needs_refresh()
                {
                    return Ok(token);
                }
                exchanges.fetch_add(1, Ordering::Relaxed);
                let token = exchange(
                    transport.as_ref(),
                    &endpoint,
                    &grant,
                    &credentials,
                    margin,
                    timeout,
                )
                .await?;
                cache.insert(identity, token.clone()).await;
                Ok(token)
            })
            .await
    }

    /// Drops the cached token for `grant` under the configured identity.
    ///
    /// An audit event is emitted at INFO level.
    pub async fn invalidate(&self, grant: &Grant) {
        self.cache.invalidate(&grant.identity(self.credentials.client_id())).await;
        tracing::info!(
            audit.action = "invalidate_token",
            audit.resource = grant.kind(),
            audit.result = "success",
            "audit_event"
        );
    }

    /// Number of grant exchanges sent to the token endpoint so far.
    #[must_use]
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    /// Number of cached tokens (eventually consistent).
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Flushes pending cache maintenance so counts are exact.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// The token endpoint: the configured override, else the discovered one.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error when discovery fails.
    pub async fn token_endpoint(&self) -> Result<Url> {
        match &self.token_endpoint {
            Some(endpoint) => Ok(endpoint.clone()),
            None => Ok(self.resolver.resolve(&self.authority).await?.token_endpoint().clone()),
        }
    }

    async fn cached(&self, identity: &str) -> Option<CachedToken> {
        self.cache.get(identity).await.filter(|token| !token.needs_refresh())
    }
}

impl std::fmt::Debug for TokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenClient")
            .field("authority", &self.authority.as_str())
            .field("credentials", &self.credentials)
            .field("refresh_margin", &self.refresh_margin)
            .field("entries", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

async fn exchange(
    transport: &dyn HttpTransport,
    endpoint: &Url,
    grant: &Grant,
    credentials: &ClientCredentials,
    margin: Duration,
    timeout: Duration,
) -> Result<CachedToken> {
    let form = grant.form(credentials);
    let fields: Vec<(&str, &str)> = form.iter().map(|(k, v)| (*k, v.as_str())).collect();

    tracing::info!(url = %endpoint, grant = grant.kind(), "requesting token");
    let response = with_deadline(timeout, transport.post_form(endpoint, &fields)).await.map_err(
        |err| {
            tracing::warn!(error = %err, "token request failed");
            AuthError::token_endpoint_unreachable_with_source(
                endpoint.as_str(),
                "token request failed",
                err,
            )
        },
    )?;

    if !response.is_success() {
        tracing::warn!(status = response.status, "token endpoint rejected the grant");
        return Err(AuthError::grant_rejected(response.status, response.body));
    }

    let token = CachedToken::from_response(
        response.status,
        &response.body,
        grant.scopes(),
        margin,
        Utc::now(),
    )?;
    tracing::info!(
        grant = grant.kind(),
        expires_at = %token.expires_at(),
        refresh_at = %token.refresh_at(),
        "token acquired"
    );
    Ok(token)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use serde_json::json;
    use tollgate_authn::{testutil::MockAuthority, transport::HttpResponse};

    use super::*;

    const AUTHORITY: &str = "https://auth.example.com/realms/demo";

    fn setup() -> (Arc<MockAuthority>, TokenClient) {
        let mock = Arc::new(MockAuthority::new(AUTHORITY));
        let config = ClientConfig::builder()
            .authority(AUTHORITY)
            .client_id("greeting-ui")
            .client_secret("ui-secret")
            .build()
            .unwrap();
        let client = TokenClient::new(&config, mock.clone()).unwrap();
        (mock, client)
    }

    #[tokio::test]
    async fn test_acquire_discovers_endpoint_and_caches() {
        let (mock, client) = setup();

        let first = client.acquire(&Grant::client_credentials()).await.unwrap();
        let second = client.acquire(&Grant::client_credentials()).await.unwrap();

        assert_eq!(first.access_token(), "opaque-token-1");
        assert_eq!(first, second);
        assert_eq!(mock.discovery_calls(), 1);
        assert_eq!(mock.token_calls(), 1);
        assert_eq!(client.exchange_count(), 1);
    }

    #[tokio::test]
    async fn test_form_carries_credentials() {
        let (mock, client) = setup();
        client
            .acquire(&Grant::password("alice", "wonderland").with_scopes(["openid"]))
            .await
            .unwrap();

        let requests = mock.token_requests();
        let form = &requests[0];
        let field = |name: &str| form.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());
        assert_eq!(field("grant_type"), Some("password"));
        assert_eq!(field("client_id"), Some("greeting-ui"));
        assert_eq!(field("client_secret"), Some("ui-secret"));
        assert_eq!(field("username"), Some("alice"));
        assert_eq!(field("scope"), Some("openid"));
    }

    #[tokio::test]
    async fn test_identities_cached_separately() {
        let (mock, client) = setup();

        let service = client.acquire(&Grant::client_credentials()).await.unwrap();
        let alice = client.acquire(&Grant::password("alice", "pw")).await.unwrap();

        assert_ne!(service.access_token(), alice.access_token());
        assert_eq!(mock.token_calls(), 2);
        client.sync().await;
        assert_eq!(client.entry_count(), 2);
    }

    #[tokio::test]
    async fn test_endpoint_override_skips_discovery() {
        let mock = Arc::new(MockAuthority::new(AUTHORITY));
        let config = ClientConfig::builder()
            .authority(AUTHORITY)
            .client_id("ui")
            .client_secret("secret")
            .token_endpoint(mock.token_endpoint().to_string())
            .build()
            .unwrap();
        let client = TokenClient::new(&config, mock.clone()).unwrap();

        client.acquire(&Grant::client_credentials()).await.unwrap();
        assert_eq!(mock.discovery_calls(), 0);
        assert_eq!(mock.token_calls(), 1);
    }

    #[tokio::test]
    async fn test_grant_rejected_carries_body() {
        let (mock, client) = setup();
        mock.set_token_response(HttpResponse::new(
            401,
            json!({"error": "unauthorized_client"}).to_string(),
        ));

        let err = client.acquire(&Grant::client_credentials()).await.unwrap_err();
        match err {
            AuthError::GrantRejected { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("unauthorized_client"));
            },
            other => panic!("expected GrantRejected, got {other:?}"),
        }
        assert!(!has_cached_tokens(&client).await);
    }

    #[tokio::test]
    async fn test_failure_not_cached() {
        let (mock, client) = setup();
        mock.set_token_response(HttpResponse::new(503, "maintenance"));
        assert!(client.acquire(&Grant::client_credentials()).await.is_err());

        mock.reset_token_response();
        assert!(client.acquire(&Grant::client_credentials()).await.is_ok());
        assert_eq!(mock.token_calls(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let (mock, client) = setup();
        // Discovery succeeds first so the failure lands on the token call.
        client.token_endpoint().await.unwrap();
        mock.fail_requests(true);

        let err = client.acquire(&Grant::client_credentials()).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenEndpointUnreachable { .. }), "got {err:?}");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_invalidate_forces_exchange() {
        let (mock, client) = setup();
        let grant = Grant::client_credentials();

        let first = client.acquire(&grant).await.unwrap();
        client.invalidate(&grant).await;
        let second = client.acquire(&grant).await.unwrap();

        assert_ne!(first.access_token(), second.access_token());
        assert_eq!(mock.token_calls(), 2);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let (_mock, client) = setup();
        assert!(!format!("{client:?}").contains("ui-secret"));
    }

    async fn has_cached_tokens(client: &TokenClient) -> bool {
        client.sync().await;
        client.entry_count() > 0
    }
}
