//! Bearer decoration of outbound requests.
//!
//! [`with_bearer`] is a pure transformation: it sets `Authorization:
//! Bearer <token>` and touches nothing else. [`CredentialRelay`] pairs it
//! with a [`TokenClient`] so a caller can acquire and decorate in one step.

use std::sync::Arc;

use http::{HeaderValue, header::AUTHORIZATION};
use tollgate_authn::{AuthError, Result};

use crate::{acquire::TokenClient, grant::Grant, token::CachedToken};

/// An outbound request that can carry an `Authorization` header.
pub trait Authorizable: Sized {
    /// Returns the request with `Authorization` set to `value`, replacing any
    /// existing value.
    fn set_authorization(self, value: HeaderValue) -> Self;
}

impl<B> Authorizable for http::Request<B> {
    fn set_authorization(mut self, value: HeaderValue) -> Self {
        self.headers_mut().insert(AUTHORIZATION, value);
        self
    }
}

impl Authorizable for reqwest::RequestBuilder {
    fn set_authorization(self, value: HeaderValue) -> Self {
        self.header(AUTHORIZATION, value)
    }
}

/// Attaches `token` as a bearer credential; without a token the request is
/// returned unmodified.
///
/// The header value is marked sensitive so HTTP stacks leave it out of
/// their own debug output.
///
/// # Errors
///
/// - [`AuthError::TokenExpired`] if the token is already past its expiry
/// - [`AuthError::Internal`] if the token contains bytes that cannot appear
///   in a header
pub fn with_bearer<R: Authorizable>(request: R, token: Option<&CachedToken>) -> Result<R> {
    let Some(token) = token else {
        return Ok(request);
    };
    if token.is_expired() {
        return Err(AuthError::token_expired());
    }
    let mut value = HeaderValue::try_from(format!("Bearer {}", token.access_token()))
        .map_err(|_| AuthError::internal("access token is not a valid header value"))?;
    value.set_sensitive(true);
    Ok(request.set_authorization(value))
}

/// Acquires a token for a fixed grant and attaches it to requests.
#[derive(Debug, Clone)]
pub struct CredentialRelay {
    client: Arc<TokenClient>,
    grant: Grant,
}

impl CredentialRelay {
    /// Creates a relay that acquires tokens for `grant` through `client`.
    #[must_use]
    pub fn new(client: Arc<TokenClient>, grant: Grant) -> Self {
        Self { client, grant }
    }

    /// The grant used for every request.
    #[must_use]
    pub fn grant(&self) -> &Grant {
        &self.grant
    }

    /// The underlying token client.
    #[must_use]
    pub fn client(&self) -> &Arc<TokenClient> {
        &self.client
    }

    /// Acquires a token (cached or fresh) and attaches it to `request`.
    ///
    /// # Errors
    ///
    /// Propagates acquisition errors; the request is never decorated with a
    /// stale or substitute token.
    #[tracing::instrument(skip(self, request), fields(grant = self.grant.kind()))]
    pub async fn authorize<R: Authorizable>(&self, request: R) -> Result<R> {
        let token = self.client.acquire(&self.grant).await?;
        with_bearer(request, Some(&token))
    }
}
