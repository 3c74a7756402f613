//! Token sources.

use crate::error::AuthResult;
use crate::tokens::claims::Claims;

/// A registered consumer of issued tokens.
///
/// Every source named in a token's audience must accept the claims for the
/// token to be valid. Sources therefore get a say on every validation, not
/// just at issuance, which is what makes revocation and provider removal take
/// effect on tokens that are already out there.
pub trait Source: Send + Sync {
    /// Unique ID, used as token audience.
    fn id(&self) -> String;

    /// Accepts or rejects the claims of a token naming this source.
    fn validate(&self, claims: &Claims) -> AuthResult<()>;
}
