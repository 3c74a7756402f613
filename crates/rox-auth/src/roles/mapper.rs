//! Role mapping for interactive logins.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AuthResult;
use crate::roles::claim_mapper::ClaimAttributes;
use crate::roles::matcher::{Mapping, RoleMatcher, resolve_role_names};
use crate::roles::store::{AccessContext, ResolvedRole, RoleDataStore};

/// Who is logging in, as seen by a role mapper.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDescriptor {
    pub user_id: String,
    pub attributes: ClaimAttributes,
}

/// Maps an authenticated user to roles.
#[async_trait]
pub trait RoleMapper: Send + Sync {
    /// Returns the roles granted to `user`. An empty result means no access.
    async fn from_user_descriptor(&self, user: &UserDescriptor) -> AuthResult<Vec<ResolvedRole>>;
}

/// Hands out the role mapper for a provider.
pub trait RoleMapperFactory: Send + Sync {
    fn role_mapper(&self, provider_id: &str) -> Arc<dyn RoleMapper>;
}

/// Role rules configured for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRoleRules {
    #[serde(default)]
    pub mappings: Vec<Mapping>,
    /// Granted when no mapping matches.
    #[serde(default)]
    pub default_role: Option<String>,
}

type RuleTable = Arc<RwLock<HashMap<String, ProviderRoleRules>>>;

/// Factory for [`RuleRoleMapper`]s that share one rule table.
///
/// Rules can be changed at any time; mappers read them on every login.
#[derive(Clone)]
pub struct RuleRoleMapperFactory {
    rules: RuleTable,
    store: Arc<dyn RoleDataStore>,
}

impl RuleRoleMapperFactory {
    #[must_use]
    pub fn new(store: Arc<dyn RoleDataStore>) -> Self {
        Self {
            rules: Arc::new(RwLock::new(HashMap::new())),
            store,
        }
    }

    /// Replaces the rules of `provider_id`.
    pub fn set_rules(&self, provider_id: impl Into<String>, rules: ProviderRoleRules) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider_id.into(), rules);
    }

    /// Drops the rules of `provider_id`.
    pub fn remove_rules(&self, provider_id: &str) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(provider_id);
    }
}

impl RoleMapperFactory for RuleRoleMapperFactory {
    fn role_mapper(&self, provider_id: &str) -> Arc<dyn RoleMapper> {
        Arc::new(RuleRoleMapper {
            provider_id: provider_id.to_string(),
            rules: self.rules.clone(),
            store: self.store.clone(),
        })
    }
}

/// Maps users through the rules of a single provider.
pub struct RuleRoleMapper {
    provider_id: String,
    rules: RuleTable,
    store: Arc<dyn RoleDataStore>,
}

#[async_trait]
impl RoleMapper for RuleRoleMapper {
    async fn from_user_descriptor(&self, user: &UserDescriptor) -> AuthResult<Vec<ResolvedRole>> {
        let rules = self
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.provider_id)
            .cloned()
            .unwrap_or_default();

        let mut names = RoleMatcher::new(&rules.mappings).matched_roles(&user.attributes);
        if names.is_empty() {
            if let Some(default_role) = rules.default_role {
                names = BTreeSet::from([default_role]);
            } else {
                return Ok(Vec::new());
            }
        }

        let ctx = AccessContext::elevated(format!("role mapping for provider {}", self.provider_id));
        resolve_role_names(&ctx, &names, self.store.as_ref()).await
    }
}
