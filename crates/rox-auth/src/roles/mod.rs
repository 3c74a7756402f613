//! Claim-to-role resolution shared by interactive logins and M2M exchange.

pub mod claim_mapper;
pub mod mapper;
pub mod matcher;
pub mod store;

pub use claim_mapper::{ClaimAttributes, apply_claim_mappings, flatten_claims};
pub use mapper::{
    ProviderRoleRules, RoleMapper, RoleMapperFactory, RuleRoleMapper, RuleRoleMapperFactory,
    UserDescriptor,
};
pub use matcher::{Mapping, RoleMatcher, compile_strict, resolve_roles_for_claims};
pub use store::{
    AccessContext, AccessLevel, InMemoryRoleStore, NONE_ROLE, ResolvedRole, RoleDataStore,
    is_none_role,
};
