//! Auth providers: configured identity backends and the registry owning them.
//!
//! - [`types`]: configurations and protocol-independent login results
//! - [`backend`]: the backend and backend factory contracts
//! - [`provider`]: providers and their transactional options
//! - [`registry`]: provider CRUD and login completion
//! - [`state`] and [`cookies`]: wire helpers for the HTTP surface

pub mod backend;
pub mod cookies;
pub mod provider;
pub mod registry;
pub mod state;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use backend::{Backend, BackendFactory, BackendFactoryCreator};
pub use cookies::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE, RefreshTokenCookieData};
pub use provider::{BackendFailurePolicy, Provider, ProviderOption, ProviderState};
pub use registry::{LoginOutcome, Registry, RegistryPaths, TestLoginUser};
pub use state::{make_state, parse_client_state, split_state};
pub use store::{AuthProviderStore, InMemoryAuthProviderStore};
pub use types::{
    AuthProviderConfig, AuthResponse, CallbackRequest, RefreshTokenData, RequestInfo,
    RequiredAttribute,
};
