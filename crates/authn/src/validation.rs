//! JWT algorithm and header validation.
//!
//! This module enforces the algorithm allow-list before any key lookup, so an
//! attacker cannot pick the verification algorithm by editing the token
//! header.
//!
//! # Security
//!
//! - Symmetric algorithms (HS256, HS384, HS512) and `none` are always rejected,
//!   whatever the configuration says
//! - Only algorithms listed in the configured [`AlgorithmPolicy`] are accepted
//! - Key IDs are bounded in length and character set before they reach a cache

use std::str::FromStr;

use jsonwebtoken::Algorithm;

use crate::error::{AuthError, Result};

/// JWT algorithms that are never accepted.
///
/// - `none`: no signature at all
/// - `HS256`, `HS384`, `HS512`: symmetric, so anyone holding the verification
///   key can mint tokens
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Algorithms accepted when none are configured.
pub const DEFAULT_ACCEPTED_ALGORITHMS: &[&str] = &["RS256", "ES256"];

/// Maximum accepted length of a `kid` header value.
pub const MAX_KID_LENGTH: usize = 256;

/// The configured set of permitted signature algorithms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmPolicy {
    allowed: Vec<Algorithm>,
}

impl AlgorithmPolicy {
    /// Builds a policy from algorithm names such as `"RS256"`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if the list is empty, names a
    /// forbidden algorithm, or names an algorithm that is not recognised.
    pub fn new<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        if names.is_empty() {
            return Err(AuthError::invalid_config("allowed_algorithms cannot be empty"));
        }

        let mut allowed = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            if is_forbidden(name) {
                return Err(AuthError::invalid_config(format!(
                    "algorithm '{name}' is not allowed for security reasons"
                )));
            }
            let algorithm = Algorithm::from_str(name)
                .map_err(|_| AuthError::invalid_config(format!("unknown algorithm '{name}'")))?;
            if !allowed.contains(&algorithm) {
                allowed.push(algorithm);
            }
        }

        Ok(Self { allowed })
    }

    /// Returns the permitted algorithms.
    #[must_use]
    pub fn allowed(&self) -> &[Algorithm] {
        &self.allowed
    }

    /// Validates the `alg` value from a token header.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnsupportedAlgorithm`] if the algorithm is
    /// forbidden, unrecognised, or not in this policy.
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate_authn::validation::AlgorithmPolicy;
    ///
    /// let policy = AlgorithmPolicy::default();
    /// assert!(policy.check("RS256").is_ok());
    /// assert!(policy.check("none").is_err());
    /// assert!(policy.check("HS256").is_err());
    /// ```
    pub fn check(&self, alg: &str) -> Result<Algorithm> {
        if is_forbidden(alg) {
            return Err(AuthError::unsupported_algorithm(format!(
                "algorithm '{alg}' is not allowed for security reasons"
            )));
        }

        let algorithm = Algorithm::from_str(alg)
            .map_err(|_| AuthError::unsupported_algorithm(format!("unknown algorithm '{alg}'")))?;

        if !self.allowed.contains(&algorithm) {
            return Err(AuthError::unsupported_algorithm(format!(
                "algorithm '{alg}' is not in the accepted list"
            )));
        }

        Ok(algorithm)
    }
}

impl Default for AlgorithmPolicy {
    fn default() -> Self {
        Self { allowed: vec![Algorithm::RS256, Algorithm::ES256] }
    }
}

// `none` is matched case-insensitively; some libraries accept `None`/`NONE`.
fn is_forbidden(alg: &str) -> bool {
    FORBIDDEN_ALGORITHMS.iter().any(|forbidden| forbidden.eq_ignore_ascii_case(alg))
}

/// Validates a `kid` header value before it is used as a lookup key.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the kid is empty, longer than
/// [`MAX_KID_LENGTH`], or contains control characters.
pub fn validate_kid(kid: &str) -> Result<()> {
    if kid.is_empty() {
        return Err(AuthError::malformed_token("kid cannot be empty"));
    }
    if kid.len() > MAX_KID_LENGTH {
        return Err(AuthError::malformed_token(format!(
            "kid exceeds {MAX_KID_LENGTH} bytes"
        )));
    }
    if kid.chars().any(char::is_control) {
        return Err(AuthError::malformed_token("kid contains control characters"));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_default_policy_accepts_rs256_and_es256() {
        let policy = AlgorithmPolicy::default();
        assert_eq!(policy.check("RS256").unwrap(), Algorithm::RS256);
        assert_eq!(policy.check("ES256").unwrap(), Algorithm::ES256);
    }

    #[test]
    fn test_default_policy_matches_default_constant() {
        assert_eq!(
            AlgorithmPolicy::new(DEFAULT_ACCEPTED_ALGORITHMS).unwrap(),
            AlgorithmPolicy::default()
        );
    }

    #[test]
    fn test_not_in_list_rejected() {
        let policy = AlgorithmPolicy::default();
        let result = policy.check("EdDSA");
        assert!(
            matches!(result, Err(AuthError::UnsupportedAlgorithm { ref message }) if message.contains("not in the accepted list"))
        );
    }

    #[rstest]
    #[case("none")]
    #[case("None")]
    #[case("NONE")]
    #[case("HS256")]
    #[case("HS384")]
    #[case("HS512")]
    fn test_forbidden_rejected_with_security_message(#[case] alg: &str) {
        let policy = AlgorithmPolicy::new(&["RS256", "ES256", "EdDSA"]).unwrap();
        let result = policy.check(alg);
        assert!(
            matches!(result, Err(AuthError::UnsupportedAlgorithm { ref message }) if message.contains("not allowed for security reasons")),
            "expected security rejection for '{alg}', got {result:?}"
        );
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let result = AlgorithmPolicy::default().check("RS999");
        assert!(matches!(result, Err(AuthError::UnsupportedAlgorithm { .. })));
    }

    #[rstest]
    #[case::hs256(&["RS256", "HS256"])]
    #[case::none(&["none"])]
    #[case::unknown(&["RSA-OAEP"])]
    fn test_policy_rejects_bad_configuration(#[case] names: &[&str]) {
        assert!(matches!(AlgorithmPolicy::new(names), Err(AuthError::InvalidConfig { .. })));
    }

    #[test]
    fn test_policy_rejects_empty_configuration() {
        let names: [&str; 0] = [];
        assert!(matches!(AlgorithmPolicy::new(&names), Err(AuthError::InvalidConfig { .. })));
    }

    #[test]
    fn test_policy_deduplicates() {
        let policy = AlgorithmPolicy::new(&["EdDSA", "EdDSA", "PS256"]).unwrap();
        assert_eq!(policy.allowed(), [Algorithm::EdDSA, Algorithm::PS256]);
    }

    #[test]
    fn test_forbidden_algorithms_constant() {
        assert_eq!(FORBIDDEN_ALGORITHMS.len(), 4);
        assert!(FORBIDDEN_ALGORITHMS.contains(&"none"));
        assert!(FORBIDDEN_ALGORITHMS.contains(&"HS256"));
        assert!(FORBIDDEN_ALGORITHMS.contains(&"HS384"));
        assert!(FORBIDDEN_ALGORITHMS.contains(&"HS512"));
    }

    #[rstest]
    #[case::empty("")]
    #[case::control("key\n1")]
    fn test_validate_kid_rejected(#[case] kid: &str) {
        assert!(matches!(validate_kid(kid), Err(AuthError::MalformedToken { .. })));
    }

    #[test]
    fn test_validate_kid_too_long() {
        let kid = "k".repeat(MAX_KID_LENGTH + 1);
        assert!(matches!(validate_kid(&kid), Err(AuthError::MalformedToken { .. })));
    }

    #[test]
    fn test_validate_kid_accepts_keycloak_style_ids() {
        assert!(validate_kid("pZ4xAnb0CL5qlFUrTBRtXxJSFIxkYj0WBuHK4s1N-hE").is_ok());
        assert!(validate_kid(&"k".repeat(MAX_KID_LENGTH)).is_ok());
    }
}
