//! In-memory token revocation.
//!
//! Revoked token IDs are kept only until the token would have expired anyway.
//! Expired entries are purged lazily: the layer remembers the nearest pending
//! expiry and only scans once that moment has passed.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use time::OffsetDateTime;
use tracing::debug;

use crate::error::{AuthError, AuthResult};
use crate::tokens::claims::Claims;

#[derive(Debug, Default)]
struct RevocationState {
    revoked: HashMap<String, OffsetDateTime>,
    next_expiry: Option<OffsetDateTime>,
}

impl RevocationState {
    fn cleanup(&mut self, now: OffsetDateTime) {
        let before = self.revoked.len();
        self.revoked.retain(|_, expiry| *expiry > now);
        self.next_expiry = self.revoked.values().min().copied();
        let purged = before - self.revoked.len();
        if purged > 0 {
            debug!(purged, remaining = self.revoked.len(), "Purged expired revocations");
        }
    }

    fn cleanup_due(&self, now: OffsetDateTime) -> bool {
        self.next_expiry.is_some_and(|next| next <= now)
    }
}

/// Tracks revoked token IDs until their original expiry.
#[derive(Debug, Default)]
pub struct RevocationLayer {
    state: RwLock<RevocationState>,
}

impl RevocationLayer {
    /// Creates an empty layer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `token_id` revoked until `expiry`.
    ///
    /// Tokens that already expired are ignored. Revoking the same ID again
    /// keeps the later of the two expiries.
    pub fn revoke(&self, token_id: &str, expiry: OffsetDateTime) {
        self.revoke_at(token_id, expiry, OffsetDateTime::now_utc());
    }

    /// Returns `true` if `token_id` is revoked and has not yet expired.
    #[must_use]
    pub fn is_revoked(&self, token_id: &str) -> bool {
        self.is_revoked_at(token_id, OffsetDateTime::now_utc())
    }

    /// Rejects claims whose token ID has been revoked.
    pub fn validate(&self, claims: &Claims) -> AuthResult<()> {
        if self.is_revoked(&claims.jti) {
            return Err(AuthError::no_credentials("token has been revoked"));
        }
        Ok(())
    }

    /// Number of entries currently held, including ones awaiting cleanup.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .revoked
            .len()
    }

    /// Returns `true` if no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn revoke_at(&self, token_id: &str, expiry: OffsetDateTime, now: OffsetDateTime) {
        if expiry <= now {
            return;
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.revoked.insert(token_id.to_string(), expiry) {
            Some(existing) if existing >= expiry => {
                state.revoked.insert(token_id.to_string(), existing);
            }
            Some(existing) => {
                // The extended entry may have been the nearest one.
                if state.next_expiry == Some(existing) {
                    state.next_expiry = state.revoked.values().min().copied();
                }
            }
            None => {
                state.next_expiry = Some(state.next_expiry.map_or(expiry, |next| next.min(expiry)));
            }
        }

        if state.cleanup_due(now) {
            state.cleanup(now);
        }
    }

    pub(crate) fn is_revoked_at(&self, token_id: &str, now: OffsetDateTime) -> bool {
        let (revoked, cleanup_due) = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            let revoked = state
                .revoked
                .get(token_id)
                .is_some_and(|expiry| *expiry > now);
            (revoked, state.cleanup_due(now))
        };

        if cleanup_due {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.cleanup_due(now) {
                state.cleanup(now);
            }
        }

        revoked
    }
}
