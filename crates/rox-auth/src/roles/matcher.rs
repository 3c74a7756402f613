//! Claim-to-role resolution.
//!
//! A [`Mapping`] grants a role when any value of one attribute matches its
//! expression. Expressions are compiled once: an empty expression matches
//! everything, a valid regular expression must match the whole value, and
//! anything that fails to compile is compared literally.

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AuthError, AuthResult, ResultExt};
use crate::roles::claim_mapper::ClaimAttributes;
use crate::roles::store::{AccessContext, ResolvedRole, RoleDataStore, is_none_role};

/// A single claim-to-role rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    /// Attribute name to inspect.
    pub key: String,
    /// Literal or regular expression matched against each attribute value.
    #[serde(default)]
    pub value_expression: String,
    /// Role granted on match.
    pub role: String,
}

impl Mapping {
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        value_expression: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value_expression: value_expression.into(),
            role: role.into(),
        }
    }
}

#[derive(Debug, Clone)]
enum ValueMatcher {
    Any,
    Regex(Regex),
    Literal(String),
}

impl ValueMatcher {
    fn compile(expression: &str) -> Self {
        if expression.is_empty() {
            return Self::Any;
        }
        match Regex::new(&format!("^(?:{expression})$")) {
            Ok(re) => Self::Regex(re),
            Err(_) => Self::Literal(expression.to_string()),
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Regex(re) => re.is_match(value),
            Self::Literal(lit) => lit == value,
        }
    }
}

/// Compiles `expression` as a whole-value regular expression.
///
/// # Errors
/// Returns `InvalidArgs` for an empty or non-compiling expression.
pub fn compile_strict(expression: &str) -> AuthResult<Regex> {
    if expression.is_empty() {
        return Err(AuthError::invalid_args(
            "mapping value expression must not be empty",
        ));
    }
    Regex::new(&format!("^(?:{expression})$")).map_err(|e| {
        AuthError::invalid_args(format!(
            "invalid regular expression {expression:?}: {e}"
        ))
    })
}

/// A set of mappings compiled for repeated evaluation.
#[derive(Debug, Clone)]
pub struct RoleMatcher {
    rules: Vec<(String, ValueMatcher, String)>,
}

impl RoleMatcher {
    /// Compiles `mappings`.
    #[must_use]
    pub fn new(mappings: &[Mapping]) -> Self {
        Self {
            rules: mappings
                .iter()
                .map(|m| {
                    (
                        m.key.clone(),
                        ValueMatcher::compile(&m.value_expression),
                        m.role.clone(),
                    )
                })
                .collect(),
        }
    }

    /// Role names whose mapping matched at least one attribute value.
    #[must_use]
    pub fn matched_roles(&self, attributes: &ClaimAttributes) -> BTreeSet<String> {
        let mut roles = BTreeSet::new();
        for (key, matcher, role) in &self.rules {
            let Some(values) = attributes.get(key) else {
                continue;
            };
            if values.iter().any(|v| matcher.matches(v)) {
                roles.insert(role.clone());
            }
        }
        roles
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Resolves the roles granted to `attributes`.
///
/// Every matched role must resolve; the deny-marker role is dropped from the
/// result after resolution.
///
/// # Errors
/// - `NoCredentials` if no mapping matched
/// - `NotFound` if a matched role does not exist
/// - any error from the role store
pub async fn resolve_roles_for_claims(
    ctx: &AccessContext,
    attributes: &ClaimAttributes,
    matcher: &RoleMatcher,
    store: &dyn RoleDataStore,
) -> AuthResult<Vec<ResolvedRole>> {
    let names = matcher.matched_roles(attributes);
    if names.is_empty() {
        return Err(AuthError::no_credentials(
            "no roles could be resolved for the presented claims",
        ));
    }
    resolve_role_names(ctx, &names, store).await
}

/// Resolves role names through the store, failing on the first missing role.
pub(crate) async fn resolve_role_names(
    ctx: &AccessContext,
    names: &BTreeSet<String>,
    store: &dyn RoleDataStore,
) -> AuthResult<Vec<ResolvedRole>> {
    let mut resolved = Vec::with_capacity(names.len());
    for name in names {
        let role = store
            .get_and_resolve_role(ctx, name)
            .await
            .with_context(|| format!("resolving role {name:?}"))?
            .ok_or_else(|| AuthError::not_found(format!("role {name:?} does not exist")))?;
        resolved.push(role);
    }

    resolved.retain(|role| !is_none_role(&role.name));
    debug!(roles = ?resolved.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), "Resolved roles");
    Ok(resolved)
}
