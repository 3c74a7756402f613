//! # rox-auth
//!
//! Authentication backbone of the platform.
//!
//! This crate provides:
//! - A registry of auth providers that routes identity-provider callbacks
//!   to pluggable backends
//! - An OIDC backend with response mode and response type negotiation
//! - Claim-to-role resolution shared by logins and M2M exchange
//! - Signed token issuance, validation and revocation
//! - Machine-to-machine exchange of external ID tokens
//!
//! ## Modules
//!
//! - [`authproviders`] - Providers, backends and the registry
//! - [`oidc`] - OIDC discovery, key sets and the OIDC backend
//! - [`tokenbased`] - Backend for providers that only issue tokens
//! - [`roles`] - Claim flattening, role matching and the role store contract
//! - [`tokens`] - Token signing, issuance, validation and revocation
//! - [`m2m`] - Machine-to-machine token exchange
//! - [`http`] - Axum routes for logins, sessions and M2M exchange

pub mod authproviders;
pub mod config;
pub mod error;
pub mod http;
pub mod m2m;
pub mod oidc;
pub mod roles;
pub mod tokenbased;
pub mod tokens;

pub use config::{AuthConfig, ConfigError, M2mSettings, OidcSettings};
pub use error::{AuthError, AuthResult, ErrorKind, ResultExt};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use rox_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::authproviders::{
        AuthProviderConfig, AuthResponse, Backend, BackendFactory, Provider, ProviderOption,
        Registry, RegistryPaths,
    };
    pub use crate::config::AuthConfig;
    pub use crate::error::{AuthError, AuthResult, ErrorKind, ResultExt};
    pub use crate::m2m::{M2mConfig, M2mConfigType, TokenExchangerSet};
    pub use crate::roles::{AccessContext, Mapping, RoleDataStore, RoleMatcher};
    pub use crate::tokens::{Issuer, IssuerFactory, RoxClaims, TokenOption, Validator};
}
