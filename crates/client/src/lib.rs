//! # Tollgate Client
//!
//! Token acquisition and bearer relay for a front end calling a protected
//! resource server.
//!
//! - [`TokenClient`] exchanges client-credentials or password grants at the
//!   authority's token endpoint and reuses each token until shortly before
//!   it expires
//! - [`with_bearer`] attaches a token to an outbound request
//! - [`ResourceClient`] forwards calls to the resource server
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tollgate_authn::ReqwestTransport;
//! use tollgate_client::{ClientConfig, CredentialRelay, Grant, ResourceClient, TokenClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::builder()
//!     .authority("https://auth.example.com/realms/demo")
//!     .client_id("greeting-ui")
//!     .client_secret("s3cr3t")
//!     .resource_base_url("https://api.example.com")
//!     .build()?;
//!
//! let transport = Arc::new(ReqwestTransport::new(config.http_timeout())?);
//! let tokens = Arc::new(TokenClient::new(&config, transport)?);
//! let relay = CredentialRelay::new(tokens, Grant::client_credentials());
//!
//! let resource = ResourceClient::from_config(&config)?;
//! let response = resource.get_relayed("greeting", &relay).await?;
//! println!("{}: {}", response.status, response.body);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Token acquisition client.
pub mod acquire;
/// Client configuration.
pub mod config;
/// Grant shapes and client credentials.
pub mod grant;
/// Bearer decoration.
pub mod relay;
/// Resource server forwarding.
pub mod resource;
/// Acquired tokens.
pub mod token;

pub use acquire::{DEFAULT_TOKEN_CAPACITY, TokenClient};
pub use config::{ClientConfig, DEFAULT_REFRESH_MARGIN};
pub use grant::{ClientCredentials, Grant};
pub use relay::{Authorizable, CredentialRelay, with_bearer};
pub use resource::{RelayedResponse, ResourceClient};
pub use token::CachedToken;
