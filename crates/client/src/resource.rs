//! Forwarding calls to the protected resource server.

use std::time::Duration;

use tollgate_authn::{AuthError, Result};
use url::Url;

use crate::{
    config::ClientConfig,
    relay::{CredentialRelay, with_bearer},
    token::CachedToken,
};

/// What the resource server answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Whether the status is 2xx.
    pub success: bool,
    /// Response body as text.
    pub body: String,
}

/// HTTP client for one resource server.
#[derive(Debug, Clone)]
pub struct ResourceClient {
    http: reqwest::Client,
    base: Url,
}

impl ResourceClient {
    /// Creates a client for `base` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if `base` cannot carry a path and
    /// [`AuthError::Internal`] if the HTTP client cannot be built.
    pub fn new(base: Url, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::internal(format!("failed to build HTTP client: {e}")))?;
        Self::with_client(http, base)
    }

    /// Creates a client from an existing `reqwest::Client`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if `base` cannot carry a path.
    pub fn with_client(http: reqwest::Client, base: Url) -> Result<Self> {
        if base.cannot_be_a_base() {
            return Err(AuthError::invalid_config(format!("'{base}' is not an absolute URL")));
        }
        Ok(Self { http, base })
    }

    /// Creates a client for the configured `resource_base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] when no resource URL is configured.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let base = config
            .resource_base_url()
            .ok_or_else(|| AuthError::invalid_config("resource_base_url is not configured"))?;
        Self::new(base.clone(), config.http_timeout())
    }

    /// The resource server base URL.
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolves `path` against the base, keeping any path prefix on the base.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if the joined URL is invalid.
    pub fn url_for(&self, path: &str) -> Result<Url> {
        let base = self.base.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{base}/{path}"))
            .map_err(|e| AuthError::invalid_config(format!("cannot join '{path}': {e}")))
    }

    /// Sends `GET {base}/{path}`, with `token` as a bearer credential when
    /// one is given.
    ///
    /// Non-2xx answers are returned, not raised; the resource server's
    /// decision is the caller's to interpret.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenExpired`] if `token` is already expired
    /// - [`AuthError::ResourceUnreachable`] on network failure or timeout
    #[tracing::instrument(skip(self, token), fields(bearer = token.is_some()))]
    pub async fn get(&self, path: &str, token: Option<&CachedToken>) -> Result<RelayedResponse> {
        let url = self.url_for(path)?;
        let request = with_bearer(self.http.get(url.clone()), token)?;
        send(request, &url).await
    }

    /// Sends `GET {base}/{path}` with a token acquired through `relay`.
    ///
    /// # Errors
    ///
    /// Acquisition errors from `relay`, otherwise as [`ResourceClient::get`].
    #[tracing::instrument(skip(self, relay))]
    pub async fn get_relayed(&self, path: &str, relay: &CredentialRelay) -> Result<RelayedResponse> {
        let url = self.url_for(path)?;
        let request = relay.authorize(self.http.get(url.clone())).await?;
        send(request, &url).await
    }
}

async fn send(request: reqwest::RequestBuilder, url: &Url) -> Result<RelayedResponse> {
    let response = request.send().await.map_err(|e| {
        tracing::warn!(url = %url, error = %e, "resource request failed");
        AuthError::resource_unreachable_with_source(url.as_str(), "request failed", e)
    })?;
    let status = response.status();
    let body = response.text().await.map_err(|e| {
        AuthError::resource_unreachable_with_source(url.as_str(), "failed to read body", e)
    })?;
    tracing::debug!(status = status.as_u16(), "resource responded");
    Ok(RelayedResponse { status: status.as_u16(), success: status.is_success(), body })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("http://localhost:5000", "greeting", "http://localhost:5000/greeting")]
    #[case("http://localhost:5000/", "/greeting", "http://localhost:5000/greeting")]
    #[case("https://api.example.com/v1/", "items/7", "https://api.example.com/v1/items/7")]
    #[case("https://api.example.com/v1", "", "https://api.example.com/v1/")]
    fn test_url_for(#[case] base: &str, #[case] path: &str, #[case] expected: &str) {
        let client = ResourceClient::new(Url::parse(base).unwrap(), Duration::from_secs(1)).unwrap();
        assert_eq!(client.url_for(path).unwrap().as_str(), expected);
    }

    #[test]
    fn test_non_base_url_rejected() {
        let result = ResourceClient::new(Url::parse("mailto:ops@example.com").unwrap(), Duration::from_secs(1));
        assert!(matches!(result, Err(AuthError::InvalidConfig { .. })));
    }

    #[test]
    fn test_from_config_requires_resource_url() {
        let config = ClientConfig::builder()
            .authority("https://auth.example.com/realms/demo")
            .client_id("ui")
            .client_secret("secret")
            .build()
            .unwrap();
        assert!(matches!(ResourceClient::from_config(&config), Err(AuthError::InvalidConfig { .. })));
    }
}
