//! Claim extraction per M2M config type.

use serde_json::{Map, Value};

use crate::error::{AuthError, AuthResult};
use crate::m2m::config::M2mConfigType;
use crate::roles::ClaimAttributes;
use crate::roles::claim_mapper::{flatten_claim_into, flatten_claims, scalar_to_string};
use crate::tokens::{ExternalUserClaim, RoxClaims};

/// Claims GitHub documents for Actions OIDC tokens. Everything else is ignored.
const GITHUB_ACTIONS_CLAIMS: &[&str] = &[
    "sub",
    "aud",
    "actor",
    "actor_id",
    "base_ref",
    "environment",
    "event_name",
    "head_ref",
    "job_workflow_ref",
    "job_workflow_sha",
    "ref",
    "ref_protected",
    "ref_type",
    "repository",
    "repository_id",
    "repository_owner",
    "repository_owner_id",
    "repository_visibility",
    "run_attempt",
    "run_id",
    "run_number",
    "runner_environment",
    "sha",
    "workflow",
    "workflow_ref",
    "workflow_sha",
];

const KUBERNETES_CLAIM: &str = "kubernetes.io";

/// Nested `kubernetes.io` objects go at most this deep.
const KUBERNETES_CLAIM_DEPTH: usize = 4;

/// Turns verified claims into role-mapping attributes and token payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimExtractor {
    Generic,
    GithubActions,
    KubeServiceAccount,
}

impl From<M2mConfigType> for ClaimExtractor {
    fn from(config_type: M2mConfigType) -> Self {
        match config_type {
            M2mConfigType::Generic => Self::Generic,
            M2mConfigType::GithubActions => Self::GithubActions,
            M2mConfigType::KubeServiceAccount => Self::KubeServiceAccount,
        }
    }
}

impl ClaimExtractor {
    /// Attributes the role mappings are matched against.
    #[must_use]
    pub fn attributes(self, claims: &Map<String, Value>) -> ClaimAttributes {
        match self {
            Self::Generic => flatten_claims(claims),
            Self::GithubActions => {
                let mut out = ClaimAttributes::new();
                for key in GITHUB_ACTIONS_CLAIMS {
                    if let Some(value) = claims.get(*key) {
                        flatten_claim_into(&mut out, key, value, 0);
                    }
                }
                out
            }
            Self::KubeServiceAccount => {
                let mut out = ClaimAttributes::new();
                for (key, value) in claims {
                    let depth = if key == KUBERNETES_CLAIM {
                        KUBERNETES_CLAIM_DEPTH
                    } else {
                        1
                    };
                    flatten_claim_into(&mut out, key, value, depth);
                }
                out
            }
        }
    }

    /// Payload of the token issued for these claims.
    ///
    /// # Errors
    /// Returns `NoCredentials` if the claims carry no subject.
    pub fn rox_claims(
        self,
        claims: &Map<String, Value>,
        attributes: ClaimAttributes,
    ) -> AuthResult<RoxClaims> {
        let subject = string_claim(claims, "sub")
            .ok_or_else(|| AuthError::no_credentials("token has no subject"))?;

        let full_name = match self {
            Self::Generic => string_claim(claims, "name")
                .or_else(|| string_claim(claims, "preferred_username"))
                .unwrap_or_else(|| subject.clone()),
            Self::GithubActions => {
                string_claim(claims, "actor").unwrap_or_else(|| subject.clone())
            }
            Self::KubeServiceAccount => subject.clone(),
        };
        let email = match self {
            Self::Generic => string_claim(claims, "email").unwrap_or_default(),
            Self::GithubActions | Self::KubeServiceAccount => String::new(),
        };

        Ok(RoxClaims {
            role_names: Vec::new(),
            name: format!("{}-{subject}", self.prefix()),
            external_user: Some(ExternalUserClaim {
                user_id: subject,
                full_name,
                email,
                attributes,
            }),
        })
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::Generic => M2mConfigType::Generic.as_str(),
            Self::GithubActions => M2mConfigType::GithubActions.as_str(),
            Self::KubeServiceAccount => M2mConfigType::KubeServiceAccount.as_str(),
        }
    }
}

fn string_claim(claims: &Map<String, Value>, key: &str) -> Option<String> {
    claims
        .get(key)
        .and_then(scalar_to_string)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_generic_flattens_one_level() {
        let claims = as_map(json!({
            "sub": "svc",
            "name": "Service",
            "email": "svc@example.com",
            "realm": {"roles": ["a", "b"], "deep": {"x": "y"}}
        }));
        let extractor = ClaimExtractor::Generic;
        let attrs = extractor.attributes(&claims);
        assert_eq!(attrs["realm.roles"], ["a", "b"]);
        assert!(!attrs.contains_key("realm.deep.x"));

        let rox = extractor.rox_claims(&claims, attrs).unwrap();
        let user = rox.external_user.unwrap();
        assert_eq!(user.user_id, "svc");
        assert_eq!(user.full_name, "Service");
        assert_eq!(user.email, "svc@example.com");
        assert_eq!(rox.name, "generic-svc");
    }

    #[test]
    fn test_github_actions_keeps_documented_claims() {
        let claims = as_map(json!({
            "sub": "repo:acme/widget:ref:refs/heads/main",
            "repository": "acme/widget",
            "actor": "octocat",
            "run_id": 42,
            "custom": "ignored"
        }));
        let extractor = ClaimExtractor::GithubActions;
        let attrs = extractor.attributes(&claims);
        assert_eq!(attrs["repository"], ["acme/widget"]);
        assert_eq!(attrs["run_id"], ["42"]);
        assert!(!attrs.contains_key("custom"));

        let rox = extractor.rox_claims(&claims, attrs).unwrap();
        assert_eq!(rox.external_user.unwrap().full_name, "octocat");
    }

    #[test]
    fn test_kube_flattens_nested_kubernetes_claim() {
        let claims = as_map(json!({
            "sub": "system:serviceaccount:stackrox:robot",
            "kubernetes.io": {
                "namespace": "stackrox",
                "serviceaccount": {"name": "robot", "uid": "sa-1"},
                "pod": {"name": "p", "uid": "pod-1"}
            }
        }));
        let attrs = ClaimExtractor::KubeServiceAccount.attributes(&claims);
        assert_eq!(attrs["kubernetes.io.namespace"], ["stackrox"]);
        assert_eq!(attrs["kubernetes.io.serviceaccount.name"], ["robot"]);
        assert_eq!(attrs["kubernetes.io.pod.uid"], ["pod-1"]);
    }

    #[test]
    fn test_missing_subject() {
        let claims = as_map(json!({"name": "x"}));
        let err = ClaimExtractor::Generic
            .rox_claims(&claims, ClaimAttributes::new())
            .unwrap_err();
        assert!(err.is_no_credentials());
    }
}
