//! OpenID Connect: provider discovery, key sets and the OIDC auth provider
//! backend.
//!
//! The discovery, key set and ID token pieces are shared with the M2M token
//! exchange, which verifies tokens from CI systems and clusters the same way.

pub mod backend;
pub mod client;
pub mod discovery;
pub mod error;
pub mod factory;
pub mod idtoken;
pub mod jwks;
pub mod negotiate;
pub mod nonce;

#[cfg(test)]
pub(crate) mod testutil;

pub use backend::OidcBackend;
pub use client::{
    ClientCredentials, HttpOidcConnector, OidcConnector, OidcProviderClient, TokenEndpointResponse,
};
pub use discovery::{DiscoveryCache, IssuerUrl, ProviderMetadata};
pub use error::OidcClientError;
pub use factory::{OidcBackendFactory, TYPE_NAME as OIDC_TYPE};
pub use idtoken::{IdTokenClaims, IdTokenVerifier};
pub use jwks::{JwksCache, JwksCacheConfig};
pub use negotiate::{ConfiguredMode, ResponseMode, ResponseType};
pub use nonce::NoncePool;
