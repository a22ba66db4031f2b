//! Request-boundary authentication pipeline.
//!
//! [`BearerGate`] runs the ordered checks a route-dispatch layer needs for
//! every inbound request:
//!
//! 1. route policy lookup: anonymous routes return immediately
//! 2. bearer presence: no token means [`Rejection::Unauthenticated`]
//! 3. token validation
//!
//! Steps 1 and 2 never touch the network. Turning the outcome into an HTTP
//! response is left to the caller; [`Rejection::status_code`] and
//! [`Rejection::www_authenticate`] provide the usual 401 values.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    config::AuthnConfig,
    error::{AuthError, ErrorCategory, Result},
    jwt::{TokenValidator, ValidatedPrincipal},
    policy::{AuthRequirement, RoutePolicy},
    transport::HttpTransport,
};

/// Successful result of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    /// The route is anonymous; no token was inspected.
    Anonymous,
    /// The token was valid.
    Authenticated(ValidatedPrincipal),
}

impl AuthOutcome {
    /// The principal, for authenticated outcomes.
    #[must_use]
    pub fn principal(&self) -> Option<&ValidatedPrincipal> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated(principal) => Some(principal),
        }
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, Error)]
pub enum Rejection {
    /// A protected route was called without a bearer token.
    #[error("authentication required")]
    Unauthenticated,
    /// The bearer token failed validation.
    #[error("invalid bearer token: {0}")]
    InvalidToken(#[source] AuthError),
}

impl Rejection {
    /// HTTP status for the dispatch layer (always 401).
    #[must_use]
    pub fn status_code(&self) -> u16 {
        401
    }

    /// RFC 6750 `WWW-Authenticate` challenge.
    ///
    /// The description is generic by category and never echoes token
    /// contents.
    #[must_use]
    pub fn www_authenticate(&self) -> String {
        match self {
            Self::Unauthenticated => "Bearer".to_string(),
            Self::InvalidToken(err) => {
                let description = match err.category() {
                    ErrorCategory::Infrastructure | ErrorCategory::Protocol => {
                        "the token could not be verified"
                    },
                    ErrorCategory::Credential | ErrorCategory::Configuration => {
                        "the access token is invalid"
                    },
                };
                format!(r#"Bearer error="invalid_token", error_description="{description}""#)
            },
        }
    }
}

/// Extracts the token from an `Authorization` header value.
///
/// The scheme is matched case-insensitively and may be followed by any number
/// of spaces; an empty token or one containing whitespace yields `None`.
#[must_use]
pub fn extract_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    Some(token)
}

/// Ordered route-policy, presence and validation checks.
#[derive(Debug, Clone)]
pub struct BearerGate {
    policy: RoutePolicy,
    validator: Arc<TokenValidator>,
}

impl BearerGate {
    /// Combines a route policy with a validator.
    #[must_use]
    pub fn new(policy: RoutePolicy, validator: Arc<TokenValidator>) -> Self {
        Self { policy, validator }
    }

    /// Builds the whole pipeline from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] for invalid settings or route patterns.
    pub fn from_config(config: &AuthnConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let policy = RoutePolicy::from_routes(config.anonymous_routes(), config.protected_routes())?;
        let validator = TokenValidator::from_config(config, transport)?;
        Ok(Self::new(policy, Arc::new(validator)))
    }

    /// The route policy.
    #[must_use]
    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }

    /// The validator.
    #[must_use]
    pub fn validator(&self) -> &Arc<TokenValidator> {
        &self.validator
    }

    /// Authenticates one request.
    ///
    /// `authorization` is the raw `Authorization` header value, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::Unauthenticated`] when a protected route has no
    /// bearer token, and [`Rejection::InvalidToken`] when validation fails.
    #[tracing::instrument(skip(self, authorization))]
    pub async fn authenticate(
        &self,
        route: &str,
        authorization: Option<&str>,
    ) -> std::result::Result<AuthOutcome, Rejection> {
        if self.policy.resolve(route) == AuthRequirement::Anonymous {
            tracing::debug!("anonymous route");
            return Ok(AuthOutcome::Anonymous);
        }

        let Some(token) = authorization.and_then(extract_bearer) else {
            tracing::debug!("no bearer token on protected route");
            return Err(Rejection::Unauthenticated);
        };

        match self.validator.validate(token).await {
            Ok(principal) => Ok(AuthOutcome::Authenticated(principal)),
            Err(err) => {
                let category = err.category();
                if err.is_transient() {
                    tracing::warn!(error = %err, category = %category, "token verification unavailable");
                } else {
                    tracing::info!(error = %err, category = %category, "token rejected");
                }
                Err(Rejection::InvalidToken(err))
            },
        }
    }
}
