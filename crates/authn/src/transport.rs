//! Outbound HTTP transport.
//!
//! The metadata resolver, key cache and token client talk to the
//! authorization server through [`HttpTransport`], so tests can substitute an
//! in-memory authority and production uses [`ReqwestTransport`].
//!
//! Every call made through this module is bounded by [`with_deadline`]; the
//! transport never retries on its own.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::error::{AuthError, Result};

/// Default bound on a single outbound call (10 seconds).
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// A buffered HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body decoded as UTF-8 (lossily).
    pub body: String,
}

impl HttpResponse {
    /// Creates a response from a status and body.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network-layer failure, before any HTTP status was received.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The call did not finish within its deadline.
    #[error("request timed out after {after:?}")]
    Timeout {
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The connection could not be established.
    #[error("connection failed: {message}")]
    Connect {
        /// Description of the failure.
        message: String,
    },

    /// Any other request failure (TLS, protocol, body read).
    #[error("request failed: {message}")]
    Request {
        /// Description of the failure.
        message: String,
    },
}

impl TransportError {
    /// Creates a new `Connect` error.
    #[must_use]
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect { message: message.into() }
    }

    /// Creates a new `Request` error.
    #[must_use]
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request { message: message.into() }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not report its configured deadline.
            Self::Timeout { after: Duration::ZERO }
        } else if err.is_connect() {
            Self::connect(err.to_string())
        } else {
            Self::request(err.to_string())
        }
    }
}

/// Client side of the authorization server protocol.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issues a `GET` and buffers the response.
    async fn get(&self, url: &Url) -> std::result::Result<HttpResponse, TransportError>;

    /// Issues a form-encoded `POST` and buffers the response.
    async fn post_form(
        &self,
        url: &Url,
        form: &[(&str, &str)],
    ) -> std::result::Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a transport whose client enforces `timeout` per request.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Internal`] if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tollgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuthError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[tracing::instrument(skip(self), fields(url = %url))]
    async fn get(&self, url: &Url) -> std::result::Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }

    #[tracing::instrument(skip(self, form), fields(url = %url))]
    async fn post_form(
        &self,
        url: &Url,
        form: &[(&str, &str)],
    ) -> std::result::Result<HttpResponse, TransportError> {
        let response = self
            .client
            .post(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

/// Runs `call` under a hard deadline.
///
/// # Errors
///
/// Returns [`TransportError::Timeout`] when `timeout` elapses first, otherwise
/// whatever `call` returned.
pub async fn with_deadline<T, F>(
    timeout: Duration,
    call: F,
) -> std::result::Result<T, TransportError>
where
    F: Future<Output = std::result::Result<T, TransportError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout { after: timeout }),
    }
}

/// Enforces the transport rule for a URL: `https` always, `http` only in
/// insecure mode, nothing else.
///
/// # Errors
///
/// Returns [`AuthError::InsecureTransport`] for `http` without insecure mode
/// and [`AuthError::InvalidConfig`] for any other scheme or a URL that cannot
/// carry a path.
pub fn check_transport(url: &Url, allow_insecure_http: bool) -> Result<()> {
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(AuthError::invalid_config(format!("'{url}' is not an absolute http(s) URL")));
    }
    match url.scheme() {
        "https" => Ok(()),
        "http" if allow_insecure_http => Ok(()),
        "http" => Err(AuthError::insecure_transport(url.as_str())),
        other => Err(AuthError::invalid_config(format!("unsupported URL scheme '{other}'"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::https("https://auth.example.com/realms/demo", false, true)]
    #[case::http_insecure("http://localhost:8080/realms/demo", true, true)]
    #[case::http_secure("http://localhost:8080/realms/demo", false, false)]
    #[case::ftp("ftp://auth.example.com", true, false)]
    fn test_check_transport(#[case] url: &str, #[case] insecure: bool, #[case] ok: bool) {
        let url = Url::parse(url).unwrap();
        assert_eq!(check_transport(&url, insecure).is_ok(), ok);
    }

    #[test]
    fn test_check_transport_http_is_insecure_transport_error() {
        let url = Url::parse("http://localhost/realms/demo").unwrap();
        assert!(matches!(
            check_transport(&url, false),
            Err(AuthError::InsecureTransport { .. })
        ));
    }

    #[test]
    fn test_check_transport_rejects_non_base_url() {
        let url = Url::parse("mailto:someone@example.com").unwrap();
        assert!(matches!(check_transport(&url, true), Err(AuthError::InvalidConfig { .. })));
    }

    #[test]
    fn test_http_response_is_success() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(302, "").is_success());
        assert!(!HttpResponse::new(500, "").is_success());
    }

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let result: std::result::Result<(), TransportError> =
            with_deadline(Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(TransportError::Timeout { after }) if after == Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_with_deadline_passes_through() {
        let result = with_deadline(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
