//! Acquired access tokens.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tollgate_authn::{AuthError, Result};
use zeroize::Zeroizing;

/// An access token held by the front end until shortly before it expires.
#[derive(Clone)]
pub struct CachedToken {
    access_token: Zeroizing<String>,
    token_type: String,
    expires_at: DateTime<Utc>,
    refresh_at: DateTime<Utc>,
    scopes: Vec<String>,
    refresh_token: Option<Zeroizing<String>>,
}

/// Token endpoint success body (RFC 6749 section 5.1).
#[derive(Deserialize)]
struct TokenResponse {
    access_token: Zeroizing<String>,
    token_type: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<Zeroizing<String>>,
    #[serde(default)]
    scope: Option<String>,
}

impl CachedToken {
    /// A bearer token expiring at `expires_at`, refreshed only at expiry.
    #[must_use]
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: Zeroizing::new(access_token.into()),
            token_type: "Bearer".to_owned(),
            expires_at,
            refresh_at: expires_at,
            scopes: Vec::new(),
            refresh_token: None,
        }
    }

    /// Parses a successful token endpoint body received at `now`.
    ///
    /// `requested_scopes` apply when the response does not echo a `scope`.
    /// The refresh point is `margin` before expiry, shortened to half the
    /// lifetime for tokens that live less than twice the margin.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::GrantRejected`] (with the given `status` and the
    /// body) if the body is not a token response or the token type is not
    /// `Bearer`.
    pub(crate) fn from_response(
        status: u16,
        body: &str,
        requested_scopes: &[String],
        margin: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let response: TokenResponse = serde_json::from_str(body)
            .map_err(|_| AuthError::grant_rejected(status, body))?;

        if !response.token_type.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::grant_rejected(
                status,
                format!("unsupported token_type '{}'", response.token_type),
            ));
        }
        if response.access_token.is_empty() {
            return Err(AuthError::grant_rejected(status, "empty access_token"));
        }

        let lifetime = Duration::from_secs(response.expires_in);
        let margin = margin.min(lifetime / 2);
        let expires_at = now.checked_add_signed(delta(lifetime)).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let refresh_at = expires_at.checked_sub_signed(delta(margin)).unwrap_or(expires_at);

        let scopes = match response.scope {
            Some(scope) => scope.split_whitespace().map(str::to_owned).collect(),
            None => requested_scopes.to_vec(),
        };

        Ok(Self {
            access_token: response.access_token,
            token_type: response.token_type,
            expires_at,
            refresh_at,
            scopes,
            refresh_token: response.refresh_token,
        })
    }

    /// Replaces the granted scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// The access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// The token type as returned by the authority.
    #[must_use]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// When the token expires.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// When the token is due for replacement.
    #[must_use]
    pub fn refresh_at(&self) -> DateTime<Utc> {
        self.refresh_at
    }

    /// Granted scopes.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Refresh token, if the authority issued one.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().map(String::as_str)
    }

    /// Returns `true` once the expiry instant has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Returns `true` once the token is within its refresh margin.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        Utc::now() >= self.refresh_at
    }

    /// Time left until the refresh point (zero once reached).
    #[must_use]
    pub fn time_to_refresh(&self) -> Duration {
        (self.refresh_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("refresh_at", &self.refresh_at)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CachedToken {
    fn eq(&self, other: &Self) -> bool {
        self.access_token == other.access_token && self.expires_at == other.expires_at
    }
}

fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
