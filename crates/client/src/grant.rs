//! OAuth grant shapes.

use zeroize::Zeroizing;

/// Client identity presented to the token endpoint with every grant.
#[derive(Clone)]
pub struct ClientCredentials {
    client_id: String,
    client_secret: Zeroizing<String>,
}

impl ClientCredentials {
    /// Creates credentials from an identifier and secret.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self { client_id: client_id.into(), client_secret: Zeroizing::new(client_secret.into()) }
    }

    /// The client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// A grant exchanged at the token endpoint.
#[derive(Clone)]
pub enum Grant {
    /// `client_credentials`: the client acts on its own behalf.
    ClientCredentials {
        /// Requested scopes; empty means the authority's default.
        scopes: Vec<String>,
    },
    /// `password`: resource-owner credentials, kept for test harnesses and
    /// legacy integrations.
    Password {
        /// Resource owner.
        username: String,
        /// Resource owner password.
        password: Zeroizing<String>,
        /// Requested scopes; empty means the authority's default.
        scopes: Vec<String>,
    },
}

impl Grant {
    /// A client-credentials grant with no explicit scopes.
    #[must_use]
    pub fn client_credentials() -> Self {
        Self::ClientCredentials { scopes: Vec::new() }
    }

    /// A resource-owner password grant with no explicit scopes.
    #[must_use]
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Password {
            username: username.into(),
            password: Zeroizing::new(password.into()),
            scopes: Vec::new(),
        }
    }

    /// Replaces the requested scopes.
    #[must_use]
    pub fn with_scopes<I, S>(mut self, requested: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requested = requested.into_iter().map(Into::into).collect();
        match &mut self {
            Self::ClientCredentials { scopes } | Self::Password { scopes, .. } => {
                *scopes = requested;
            },
        }
        self
    }

    /// The `grant_type` form value.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientCredentials { .. } => "client_credentials",
            Self::Password { .. } => "password",
        }
    }

    /// Requested scopes.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        match self {
            Self::ClientCredentials { scopes } | Self::Password { scopes, .. } => scopes,
        }
    }

    /// Cache key for tokens obtained with this grant by `client_id`.
    ///
    /// Scope order does not matter; secrets never take part.
    #[must_use]
    pub fn identity(&self, client_id: &str) -> String {
        let mut scopes: Vec<&str> = self.scopes().iter().map(String::as_str).collect();
        scopes.sort_unstable();
        scopes.dedup();
        let username = match self {
            Self::ClientCredentials { .. } => "",
            Self::Password { username, .. } => username,
        };
        format!("{client_id}\u{1f}{}\u{1f}{username}\u{1f}{}", self.kind(), scopes.join(" "))
    }

    /// Form body for the token request; values are scrubbed on drop.
    pub(crate) fn form(
        &self,
        credentials: &ClientCredentials,
    ) -> Vec<(&'static str, Zeroizing<String>)> {
        let value = |v: &str| Zeroizing::new(v.to_owned());
        let mut form = vec![
            ("grant_type", value(self.kind())),
            ("client_id", value(credentials.client_id())),
            ("client_secret", value(credentials.client_secret())),
        ];
        if let Self::Password { username, password, .. } = self {
            form.push(("username", value(username)));
            form.push(("password", value(password)));
        }
        if !self.scopes().is_empty() {
            form.push(("scope", Zeroizing::new(self.scopes().join(" "))));
        }
        form
    }
}

impl std::fmt::Debug for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientCredentials { scopes } => {
                f.debug_struct("ClientCredentials").field("scopes", scopes).finish()
            },
            Self::Password { username, scopes, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .field("scopes", scopes)
                .finish(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn credentials() -> ClientCredentials {
        ClientCredentials::new("greeting-ui", "client-secret")
    }

    fn field<'a>(form: &'a [(&str, Zeroizing<String>)], name: &str) -> Option<&'a str> {
        form.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_client_credentials_form() {
        let creds = credentials();
        let grant = Grant::client_credentials();
        let form = grant.form(&creds);

        assert_eq!(field(&form, "grant_type"), Some("client_credentials"));
        assert_eq!(field(&form, "client_id"), Some("greeting-ui"));
        assert_eq!(field(&form, "client_secret"), Some("client-secret"));
        assert_eq!(field(&form, "scope"), None);
        assert_eq!(field(&form, "username"), None);
    }

    #[test]
    fn test_password_form_with_scopes() {
        let creds = credentials();
        let grant = Grant::password("alice", "wonderland").with_scopes(["openid", "profile"]);
        let form = grant.form(&creds);

        assert_eq!(field(&form, "grant_type"), Some("password"));
        assert_eq!(field(&form, "username"), Some("alice"));
        assert_eq!(field(&form, "password"), Some("wonderland"));
        assert_eq!(field(&form, "scope"), Some("openid profile"));
    }

    #[test]
    fn test_identity_ignores_scope_order() {
        let a = Grant::client_credentials().with_scopes(["b", "a"]);
        let b = Grant::client_credentials().with_scopes(["a", "b", "a"]);
        assert_eq!(a.identity("ui"), b.identity("ui"));
    }

    #[test]
    fn test_identity_separates_clients_users_and_kinds() {
        let cc = Grant::client_credentials();
        let alice = Grant::password("alice", "x");
        let bob = Grant::password("bob", "x");

        assert_ne!(cc.identity("ui"), cc.identity("other"));
        assert_ne!(cc.identity("ui"), alice.identity("ui"));
        assert_ne!(alice.identity("ui"), bob.identity("ui"));
    }

    #[test]
    fn test_identity_excludes_secrets() {
        let grant = Grant::password("alice", "wonderland");
        assert!(!grant.identity("ui").contains("wonderland"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let grant = Grant::password("alice", "wonderland");
        let debug = format!("{grant:?} {:?}", credentials());
        assert!(debug.contains("alice"));
        assert!(!debug.contains("wonderland"));
        assert!(!debug.contains("client-secret"));
    }
}
