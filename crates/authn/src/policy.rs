//! Route authorization policy.
//!
//! A static table, built once at startup, that decides whether a route needs
//! a bearer token. Routes are secure by default: only routes matched by an
//! anonymous pattern (and not by an explicitly protected one) skip
//! validation.
//!
//! Patterns use `matchit` syntax: `/health`, `/items/{id}`, `/static/{*rest}`.

use crate::error::{AuthError, Result};

/// Authentication requirement of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequirement {
    /// Served without a token.
    Anonymous,
    /// A valid bearer token is required.
    Required,
}

/// Immutable route-to-requirement table.
#[derive(Clone)]
pub struct RoutePolicy {
    anonymous: matchit::Router<()>,
    protected: matchit::Router<()>,
}

impl RoutePolicy {
    /// Starts a policy builder.
    #[must_use]
    pub fn builder() -> RoutePolicyBuilder {
        RoutePolicyBuilder::default()
    }

    /// A policy where every route requires authentication.
    #[must_use]
    pub fn secure_by_default() -> Self {
        Self { anonymous: matchit::Router::new(), protected: matchit::Router::new() }
    }

    /// Builds a policy from configured pattern lists.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if a pattern is invalid or
    /// conflicts with another in the same list.
    pub fn from_routes<A, P>(anonymous: &[A], protected: &[P]) -> Result<Self>
    where
        A: AsRef<str>,
        P: AsRef<str>,
    {
        let mut builder = Self::builder();
        for route in anonymous {
            builder = builder.anonymous(route.as_ref());
        }
        for route in protected {
            builder = builder.protected(route.as_ref());
        }
        builder.build()
    }

    /// Resolves the requirement for a route identifier; any query string is ignored.
    #[must_use]
    pub fn resolve(&self, route: &str) -> AuthRequirement {
        let path = route.split_once('?').map_or(route, |(path, _)| path);

        if self.protected.at(path).is_ok() {
            return AuthRequirement::Required;
        }
        if self.anonymous.at(path).is_ok() {
            return AuthRequirement::Anonymous;
        }
        AuthRequirement::Required
    }

    /// Returns `true` unless the route is explicitly anonymous.
    #[must_use]
    pub fn requires_auth(&self, route: &str) -> bool {
        self.resolve(route) == AuthRequirement::Required
    }
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self::secure_by_default()
    }
}

impl std::fmt::Debug for RoutePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutePolicy").finish_non_exhaustive()
    }
}

/// Collects route patterns for a [`RoutePolicy`].
#[derive(Debug, Default)]
pub struct RoutePolicyBuilder {
    anonymous: Vec<String>,
    protected: Vec<String>,
}

impl RoutePolicyBuilder {
    /// Marks a route pattern as anonymous.
    #[must_use]
    pub fn anonymous(mut self, route: impl Into<String>) -> Self {
        self.anonymous.push(route.into());
        self
    }

    /// Marks a route pattern as protected, overriding anonymous patterns.
    #[must_use]
    pub fn protected(mut self, route: impl Into<String>) -> Self {
        self.protected.push(route.into());
        self
    }

    /// Compiles the patterns.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if a pattern is invalid or
    /// conflicts with another in the same list.
    pub fn build(self) -> Result<RoutePolicy> {
        Ok(RoutePolicy {
            anonymous: compile("anonymous", &self.anonymous)?,
            protected: compile("protected", &self.protected)?,
        })
    }
}

fn compile(kind: &str, routes: &[String]) -> Result<matchit::Router<()>> {
    let mut router = matchit::Router::new();
    for route in routes {
        if route.is_empty() {
            return Err(AuthError::invalid_config(format!("empty {kind} route")));
        }
        router.insert(route.as_str(), ()).map_err(|e| {
            AuthError::invalid_config(format!("invalid {kind} route '{route}': {e}"))
        })?;
    }
    Ok(router)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn policy() -> RoutePolicy {
        RoutePolicy::builder()
            .anonymous("/health")
            .anonymous("/docs/{*rest}")
            .anonymous("/public/{id}")
            .protected("/public/admin")
            .build()
            .unwrap()
    }

    #[rstest]
    #[case::health("/health", false)]
    #[case::health_query("/health?verbose=1", false)]
    #[case::docs_wildcard("/docs/index.html", false)]
    #[case::public_param("/public/42", false)]
    #[case::protected_override("/public/admin", true)]
    #[case::greeting("/greeting", true)]
    #[case::unknown("/anything/else", true)]
    #[case::health_prefix("/healthz", true)]
    #[case::empty("", true)]
    fn test_requires_auth(#[case] route: &str, #[case] expected: bool) {
        assert_eq!(policy().requires_auth(route), expected);
    }

    #[test]
    fn test_secure_by_default() {
        let policy = RoutePolicy::default();
        assert_eq!(policy.resolve("/health"), AuthRequirement::Required);
    }

    #[test]
    fn test_from_routes() {
        let policy = RoutePolicy::from_routes(&["/health"], &["/greeting"]).unwrap();
        assert_eq!(policy.resolve("/health"), AuthRequirement::Anonymous);
        assert_eq!(policy.resolve("/greeting"), AuthRequirement::Required);
    }

    #[test]
    fn test_conflicting_routes_rejected() {
        let result = RoutePolicy::builder().anonymous("/items/{id}").anonymous("/items/{key}").build();
        assert!(matches!(result, Err(AuthError::InvalidConfig { .. })));
    }

    #[test]
    fn test_empty_route_rejected() {
        let result = RoutePolicy::builder().anonymous("").build();
        assert!(matches!(result, Err(AuthError::InvalidConfig { .. })));
    }
}
