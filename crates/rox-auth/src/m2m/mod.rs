//! Machine-to-machine token exchange.
//!
//! A workload presents an ID token issued by a CI system, a cluster or any
//! OIDC issuer. The exchanger configured for that issuer verifies the token,
//! maps its claims to roles and issues a short-lived platform token.
//!
//! ```text
//! raw token ──► issuer_from_raw_id_token ──► TokenExchangerSet
//!                                               │
//!                                               ▼
//!                 TokenVerifier ─► ClaimExtractor ─► RoleMatcher ─► Issuer
//! ```

pub mod config;
pub mod exchanger;
pub mod extractor;
pub mod issuer;
pub mod kube;
pub mod set;
pub mod verifier;

pub use config::{GITHUB_ACTIONS_ISSUER, M2mConfig, M2mConfigError, M2mConfigType};
pub use exchanger::TokenExchanger;
pub use extractor::ClaimExtractor;
pub use issuer::{LEGACY_KUBE_ISSUER, issuer_from_raw_id_token};
pub use kube::{HttpKubeApi, KubeApi, ReviewedUser, TokenReviewStatus};
pub use set::TokenExchangerSet;
pub use verifier::{
    KubeTokenReviewVerifier, NetworkVerifierFactory, OidcTokenVerifier, TokenVerifier,
    TokenVerifierFactory,
};
