//! Platform token issuance, validation and revocation.
//!
//! - [`claims`]: the wire payload of issued tokens
//! - [`signer`]: key material and compact JWT encoding
//! - [`options`]: layered expiry/extra options
//! - [`issuer`]: per-source issuers and the validator
//! - [`revocation`]: revoked token IDs with lazy cleanup

pub mod claims;
pub mod issuer;
pub mod options;
pub mod revocation;
pub mod signer;
pub mod source;

pub use claims::{Claims, ExternalUserClaim, RoxClaims};
pub use issuer::{Issuer, IssuerFactory, TokenInfo, Validator};
pub use options::TokenOption;
pub use revocation::RevocationLayer;
pub use signer::{Jwk, Jwks, SigningAlgorithm, SigningError, SigningKeyPair, TokenSigner};
pub use source::Source;
