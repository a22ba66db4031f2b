//! Front-end client settings.
//!
//! [`ClientConfig`] carries the credential identity used for token
//! acquisition plus the transport settings for the authority and the
//! downstream resource server. Secrets are held in [`Zeroizing`] buffers,
//! never serialised and redacted from `Debug`.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tollgate_client::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .authority("https://auth.example.com/realms/demo")
//!     .client_id("greeting-ui")
//!     .client_secret("s3cr3t")
//!     .refresh_margin(Duration::from_secs(15))
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.client_id(), "greeting-ui");
//! assert!(!format!("{config:?}").contains("s3cr3t"));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tollgate_authn::{
    AuthError, Result,
    transport::{DEFAULT_HTTP_TIMEOUT, check_transport},
};
use url::Url;
use zeroize::Zeroizing;

/// Default safety margin before expiry at which a cached token is replaced (30 seconds).
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(30);

fn default_refresh_margin() -> Duration {
    DEFAULT_REFRESH_MARGIN
}

fn default_http_timeout() -> Duration {
    DEFAULT_HTTP_TIMEOUT
}

/// Settings for acquiring tokens and relaying them downstream.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Authorization server whose token endpoint is discovered.
    authority: Url,
    /// OAuth client identifier.
    client_id: String,
    /// OAuth client secret.
    #[serde(skip_serializing)]
    client_secret: Zeroizing<String>,
    /// Explicit token endpoint, bypassing discovery.
    #[serde(default)]
    token_endpoint: Option<Url>,
    /// Remaining lifetime at which a cached token is re-acquired.
    #[serde(default = "default_refresh_margin", with = "humantime_serde")]
    refresh_margin: Duration,
    /// Permit plain `http` for the authority and token endpoint.
    #[serde(default)]
    allow_insecure_http: bool,
    /// Bound on each outbound call.
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    http_timeout: Duration,
    /// Base URL of the protected resource server.
    #[serde(default)]
    resource_base_url: Option<Url>,
}

#[bon::bon]
impl ClientConfig {
    /// Creates a new configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if:
    /// - `authority`, `token_endpoint` or `resource_base_url` is not an absolute `http(s)` URL
    /// - `client_id` or `client_secret` is empty
    /// - `http_timeout` is zero
    ///
    /// Returns [`AuthError::InsecureTransport`] if the authority or token
    /// endpoint is plain `http` and `allow_insecure_http` is not set.
    #[builder]
    pub fn new(
        #[builder(into)] authority: String,
        #[builder(into)] client_id: String,
        #[builder(into)] client_secret: String,
        #[builder(into)] token_endpoint: Option<String>,
        #[builder(default = DEFAULT_REFRESH_MARGIN)] refresh_margin: Duration,
        #[builder(default)] allow_insecure_http: bool,
        #[builder(default = DEFAULT_HTTP_TIMEOUT)] http_timeout: Duration,
        #[builder(into)] resource_base_url: Option<String>,
    ) -> Result<Self> {
        let config = Self {
            authority: parse_url("authority", &authority)?,
            client_id,
            client_secret: Zeroizing::new(client_secret),
            token_endpoint: token_endpoint.map(|url| parse_url("token_endpoint", &url)).transpose()?,
            refresh_margin,
            allow_insecure_http,
            http_timeout,
            resource_base_url: resource_base_url
                .map(|url| parse_url("resource_base_url", &url))
                .transpose()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the builder enforces; call after deserialising.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::new`].
    pub fn validate(&self) -> Result<()> {
        check_transport(&self.authority, self.allow_insecure_http)?;
        if let Some(endpoint) = &self.token_endpoint {
            check_transport(endpoint, self.allow_insecure_http)?;
        }
        if let Some(base) = &self.resource_base_url
            && base.cannot_be_a_base()
        {
            return Err(AuthError::invalid_config(format!(
                "resource_base_url '{base}' is not an absolute URL"
            )));
        }
        if self.client_id.trim().is_empty() {
            return Err(AuthError::invalid_config("client_id cannot be empty"));
        }
        if self.client_secret.is_empty() {
            return Err(AuthError::invalid_config("client_secret cannot be empty"));
        }
        if self.http_timeout.is_zero() {
            return Err(AuthError::invalid_config("http_timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Returns the authority.
    #[must_use]
    pub fn authority(&self) -> &Url {
        &self.authority
    }

    /// Returns the client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Returns the token endpoint override, if any.
    #[must_use]
    pub fn token_endpoint(&self) -> Option<&Url> {
        self.token_endpoint.as_ref()
    }

    /// Returns the refresh margin.
    #[must_use]
    pub fn refresh_margin(&self) -> Duration {
        self.refresh_margin
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

    /// Returns the resource server base URL, if configured.
    #[must_use]
    pub fn resource_base_url(&self) -> Option<&Url> {
        self.resource_base_url.as_ref()
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("authority", &self.authority.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_endpoint", &self.token_endpoint.as_ref().map(Url::as_str))
            .field("refresh_margin", &self.refresh_margin)
            .field("allow_insecure_http", &self.allow_insecure_http)
            .field("http_timeout", &self.http_timeout)
            .field("resource_base_url", &self.resource_base_url.as_ref().map(Url::as_str))
            .finish()
    }
}

fn parse_url(field: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| AuthError::invalid_config(format!("{field} '{value}': {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    const AUTHORITY: &str = "https://auth.example.com/realms/demo";

    #[test]
    fn test_builder_defaults() {
        let config = ClientConfig::builder()
            .authority(AUTHORITY)
            .client_id("ui")
            .client_secret("secret")
            .build()
            .unwrap();

        assert_eq!(config.refresh_margin(), DEFAULT_REFRESH_MARGIN);
        assert_eq!(config.http_timeout(), DEFAULT_HTTP_TIMEOUT);
        assert!(!config.allow_insecure_http());
        assert!(config.token_endpoint().is_none());
        assert!(config.resource_base_url().is_none());
    }

    #[rstest]
    #[case::empty_client_id("", "secret")]
    #[case::blank_client_id("  ", "secret")]
    #[case::empty_secret("ui", "")]
    fn test_missing_credentials_rejected(#[case] client_id: &str, #[case] secret: &str) {
        let result = ClientConfig::builder()
            .authority(AUTHORITY)
            .client_id(client_id)
            .client_secret(secret)
            .build();
        assert!(matches!(result, Err(AuthError::InvalidConfig { .. })));
    }

    #[test]
    fn test_plain_http_token_endpoint_rejected() {
        let result = ClientConfig::builder()
            .authority(AUTHORITY)
            .client_id("ui")
            .client_secret("secret")
            .token_endpoint("http://auth.example.com/token")
            .build();
        assert!(matches!(result, Err(AuthError::InsecureTransport { .. })));
    }

    #[test]
    fn test_insecure_mode_allows_http() {
        let config = ClientConfig::builder()
            .authority("http://localhost:8080/realms/demo")
            .client_id("ui")
            .client_secret("secret")
            .allow_insecure_http(true)
            .resource_base_url("http://localhost:5000")
            .build()
            .unwrap();
        assert_eq!(config.resource_base_url().unwrap().as_str(), "http://localhost:5000/");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = ClientConfig::builder()
            .authority(AUTHORITY)
            .client_id("ui")
            .client_secret("secret")
            .http_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(AuthError::InvalidConfig { .. })));
    }

    #[test]
    fn test_deserialize_and_validate() {
        let json = r#"{
            "authority": "https://auth.example.com/realms/demo",
            "client_id": "ui",
            "client_secret": "secret",
            "refresh_margin": "45s"
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.refresh_margin(), Duration::from_secs(45));
        assert_eq!(config.client_secret(), "secret");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let json = r#"{"authority": "https://a", "client_id": "ui", "client_secret": "s", "realm": "x"}"#;
        assert!(serde_json::from_str::<ClientConfig>(json).is_err());
    }

    #[test]
    fn test_secret_not_serialized_or_debugged() {
        let config = ClientConfig::builder()
            .authority(AUTHORITY)
            .client_id("ui")
            .client_secret("hunter2")
            .build()
            .unwrap();

        assert!(!serde_json::to_string(&config).unwrap().contains("hunter2"));
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
