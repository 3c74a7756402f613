//! Role data store collaborator.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AuthError, AuthResult};

/// Name of the role that marks an explicit deny mapping.
pub const NONE_ROLE: &str = "None";

/// Returns `true` for the deny-marker role, in any letter case.
#[must_use]
pub fn is_none_role(name: &str) -> bool {
    name.eq_ignore_ascii_case(NONE_ROLE)
}

/// Access granted on one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    NoAccess,
    ReadAccess,
    ReadWriteAccess,
}

/// A role with its permissions resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRole {
    pub name: String,
    #[serde(default)]
    pub permissions: BTreeMap<String, AccessLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_scope: Option<String>,
}

impl ResolvedRole {
    /// A role without any permissions.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permissions: BTreeMap::new(),
            access_scope: None,
        }
    }
}

/// Identifies who is asking the role store for data.
///
/// Callers that are still authenticating have no identity yet, so role
/// lookups on their behalf run under an elevated context that records why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessContext {
    can_read_roles: bool,
    reason: Option<String>,
}

impl AccessContext {
    /// Context of a caller that has not authenticated.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self {
            can_read_roles: false,
            reason: None,
        }
    }

    /// Context with role read access, granted for `reason`.
    #[must_use]
    pub fn elevated(reason: impl Into<String>) -> Self {
        Self {
            can_read_roles: true,
            reason: Some(reason.into()),
        }
    }

    #[must_use]
    pub fn can_read_roles(&self) -> bool {
        self.can_read_roles
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// Resolves role names to full roles.
#[async_trait]
pub trait RoleDataStore: Send + Sync {
    /// Returns the role with its permissions, or `None` if it does not exist.
    ///
    /// # Errors
    /// `NotAuthorized` if `ctx` may not read roles; `Internal` on storage failure.
    async fn get_and_resolve_role(
        &self,
        ctx: &AccessContext,
        name: &str,
    ) -> AuthResult<Option<ResolvedRole>>;
}

/// Role store held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRoleStore {
    roles: Arc<RwLock<HashMap<String, ResolvedRole>>>,
}

impl InMemoryRoleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the given roles plus the deny-marker role.
    #[must_use]
    pub fn with_roles(roles: impl IntoIterator<Item = ResolvedRole>) -> Self {
        let mut map: HashMap<String, ResolvedRole> =
            roles.into_iter().map(|r| (r.name.clone(), r)).collect();
        map.entry(NONE_ROLE.to_string())
            .or_insert_with(|| ResolvedRole::named(NONE_ROLE));
        Self {
            roles: Arc::new(RwLock::new(map)),
        }
    }

    /// Adds or replaces a role.
    pub async fn upsert_role(&self, role: ResolvedRole) {
        self.roles.write().await.insert(role.name.clone(), role);
    }

    /// Removes a role. Returns `true` if it existed.
    pub async fn remove_role(&self, name: &str) -> bool {
        self.roles.write().await.remove(name).is_some()
    }
}

#[async_trait]
impl RoleDataStore for InMemoryRoleStore {
    async fn get_and_resolve_role(
        &self,
        ctx: &AccessContext,
        name: &str,
    ) -> AuthResult<Option<ResolvedRole>> {
        if !ctx.can_read_roles() {
            return Err(AuthError::not_authorized("role read access required"));
        }
        Ok(self.roles.read().await.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_requires_role_read_access() {
        let store = InMemoryRoleStore::with_roles([ResolvedRole::named("Admin")]);

        let err = store
            .get_and_resolve_role(&AccessContext::unauthenticated(), "Admin")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotAuthorized);

        let ctx = AccessContext::elevated("test");
        let role = store.get_and_resolve_role(&ctx, "Admin").await.unwrap();
        assert_eq!(role.unwrap().name, "Admin");
        assert!(store.get_and_resolve_role(&ctx, "Nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_none_role_seeded() {
        let store = InMemoryRoleStore::with_roles([]);
        let ctx = AccessContext::elevated("test");
        assert!(store.get_and_resolve_role(&ctx, NONE_ROLE).await.unwrap().is_some());
        assert!(is_none_role("none"));
        assert!(is_none_role("None"));
        assert!(!is_none_role("Analyst"));
    }

    #[tokio::test]
    async fn test_upsert_and_remove() {
        let store = InMemoryRoleStore::new();
        store.upsert_role(ResolvedRole::named("Analyst")).await;
        assert!(store.remove_role("Analyst").await);
        assert!(!store.remove_role("Analyst").await);
    }
}
