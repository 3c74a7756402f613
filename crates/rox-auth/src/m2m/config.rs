//! Machine-to-machine exchange configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::M2mSettings;
use crate::error::AuthError;
use crate::roles::{Mapping, compile_strict};

/// Issuer of GitHub Actions workflow identity tokens.
pub const GITHUB_ACTIONS_ISSUER: &str = "https://token.actions.githubusercontent.com";

/// Kind of identity the exchanged tokens describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum M2mConfigType {
    Generic,
    GithubActions,
    KubeServiceAccount,
}

impl M2mConfigType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::GithubActions => "github-actions",
            Self::KubeServiceAccount => "kube-service-account",
        }
    }
}

impl fmt::Display for M2mConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One trusted external issuer and the roles its tokens map to.
///
/// # Example (TOML)
///
/// ```toml
/// [[m2m]]
/// id = "ci"
/// type = "GITHUB_ACTIONS"
/// token_expiration_duration = "5m"
///
/// [[m2m.mappings]]
/// key = "repository"
/// value_expression = "github.com/acme/widget.*"
/// role = "ci"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct M2mConfig {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type")]
    pub config_type: M2mConfigType,

    /// Lifetime of the tokens issued for exchanged tokens.
    #[serde(with = "humantime_serde", default)]
    pub token_expiration_duration: Duration,

    /// Issuer URL. May be empty for GitHub Actions and Kubernetes configs.
    #[serde(default)]
    pub issuer: String,

    #[serde(default)]
    pub mappings: Vec<Mapping>,
}

/// Reasons an [`M2mConfig`] is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum M2mConfigError {
    #[error("empty config ID")]
    MissingId,

    #[error("token expiration must be between {min:?} and {max:?}, got {actual:?}")]
    InvalidExpiration {
        actual: Duration,
        min: Duration,
        max: Duration,
    },

    #[error("invalid issuer {issuer:?}: {reason}")]
    InvalidIssuer { issuer: String, reason: String },

    #[error("invalid mapping for key {key:?}: {reason}")]
    InvalidMapping { key: String, reason: String },
}

impl From<M2mConfigError> for AuthError {
    fn from(err: M2mConfigError) -> Self {
        AuthError::invalid_args(err.to_string())
    }
}

impl M2mConfig {
    /// Fills in the issuer implied by the config type.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        if self.config_type == M2mConfigType::GithubActions && self.issuer.is_empty() {
            self.issuer = GITHUB_ACTIONS_ISSUER.to_string();
        }
        self
    }

    /// Checks the config before it is applied.
    ///
    /// Kubernetes configs may leave the issuer empty; it is discovered from
    /// the cluster when the exchanger is built.
    ///
    /// # Errors
    /// Returns the first rule that is violated.
    pub fn validate(&self, skip_id_check: bool, settings: &M2mSettings) -> Result<(), M2mConfigError> {
        if !skip_id_check && self.id.is_empty() {
            return Err(M2mConfigError::MissingId);
        }

        let ttl = self.token_expiration_duration;
        if ttl < settings.min_token_expiration || ttl > settings.max_token_expiration {
            return Err(M2mConfigError::InvalidExpiration {
                actual: ttl,
                min: settings.min_token_expiration,
                max: settings.max_token_expiration,
            });
        }

        if !(self.config_type == M2mConfigType::KubeServiceAccount && self.issuer.is_empty()) {
            validate_issuer(&self.issuer, settings.allow_http)?;
        }
        if self.config_type == M2mConfigType::GithubActions && self.issuer != GITHUB_ACTIONS_ISSUER
        {
            return Err(M2mConfigError::InvalidIssuer {
                issuer: self.issuer.clone(),
                reason: format!("GitHub Actions configs must use {GITHUB_ACTIONS_ISSUER}"),
            });
        }

        for mapping in &self.mappings {
            compile_strict(&mapping.value_expression).map_err(|e| {
                M2mConfigError::InvalidMapping {
                    key: mapping.key.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(())
    }
}

fn validate_issuer(issuer: &str, allow_http: bool) -> Result<(), M2mConfigError> {
    let invalid = |reason: &str| M2mConfigError::InvalidIssuer {
        issuer: issuer.to_string(),
        reason: reason.to_string(),
    };
    if issuer.is_empty() {
        return Err(invalid("issuer must not be empty"));
    }
    if has_malformed_escape(issuer) {
        return Err(invalid("malformed percent-encoding"));
    }
    let url = url::Url::parse(issuer).map_err(|e| invalid(&e.to_string()))?;
    match url.scheme() {
        "https" => {}
        "http" if allow_http => {}
        _ => return Err(invalid("issuer must use https")),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("issuer has no host"));
    }
    Ok(())
}

/// The URL parser passes stray `%` through, so check escapes explicitly.
fn has_malformed_escape(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.iter().enumerate().any(|(i, b)| {
        *b == b'%'
            && !(bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
                && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> M2mSettings {
        M2mSettings::default()
    }

    fn generic(ttl: Duration, issuer: &str) -> M2mConfig {
        M2mConfig {
            id: "cfg-1".to_string(),
            config_type: M2mConfigType::Generic,
            token_expiration_duration: ttl,
            issuer: issuer.to_string(),
            mappings: vec![Mapping::new("sub", "my-service", "Admin")],
        }
    }

    #[test]
    fn test_valid_generic_config() {
        let config = generic(Duration::from_secs(300), "https://stackrox.io");
        assert!(config.validate(false, &settings()).is_ok());
    }

    #[test]
    fn test_expiration_bounds() {
        for ttl in [
            Duration::ZERO,
            Duration::from_secs(1),
            Duration::from_secs(24 * 3600 + 1),
        ] {
            let err = generic(ttl, "https://stackrox.io")
                .validate(false, &settings())
                .unwrap_err();
            assert!(matches!(err, M2mConfigError::InvalidExpiration { .. }), "{ttl:?}");
        }
        let max = generic(Duration::from_secs(24 * 3600), "https://stackrox.io");
        assert!(max.validate(false, &settings()).is_ok());
    }

    #[test]
    fn test_id_check_can_be_skipped() {
        let mut config = generic(Duration::from_secs(300), "https://stackrox.io");
        config.id.clear();
        assert_eq!(
            config.validate(false, &settings()),
            Err(M2mConfigError::MissingId)
        );
        assert!(config.validate(true, &settings()).is_ok());
    }

    #[test]
    fn test_issuer_rules() {
        for issuer in [
            "",
            "http://stackrox.io",
            "https://something-invalid/%+o",
            "not a url",
        ] {
            let err = generic(Duration::from_secs(300), issuer)
                .validate(false, &settings())
                .unwrap_err();
            assert!(matches!(err, M2mConfigError::InvalidIssuer { .. }), "{issuer}");
        }

        let relaxed = M2mSettings {
            allow_http: true,
            ..settings()
        };
        assert!(
            generic(Duration::from_secs(300), "http://127.0.0.1:8080")
                .validate(false, &relaxed)
                .is_ok()
        );
    }

    #[test]
    fn test_github_actions_issuer_defaults_and_is_pinned() {
        let config = M2mConfig {
            config_type: M2mConfigType::GithubActions,
            ..generic(Duration::from_secs(300), "")
        }
        .normalize();
        assert_eq!(config.issuer, GITHUB_ACTIONS_ISSUER);
        assert!(config.validate(false, &settings()).is_ok());

        let wrong = M2mConfig {
            config_type: M2mConfigType::GithubActions,
            ..generic(Duration::from_secs(300), "https://stackrox.io")
        };
        assert!(matches!(
            wrong.validate(false, &settings()),
            Err(M2mConfigError::InvalidIssuer { .. })
        ));
    }

    #[test]
    fn test_kube_issuer_may_be_empty() {
        let config = M2mConfig {
            config_type: M2mConfigType::KubeServiceAccount,
            ..generic(Duration::from_secs(300), "")
        };
        assert!(config.validate(false, &settings()).is_ok());
    }

    #[test]
    fn test_mapping_expressions_must_compile() {
        for expression in ["", "a(b"] {
            let mut config = generic(Duration::from_secs(300), "https://stackrox.io");
            config.mappings = vec![Mapping::new("sub", expression, "Admin")];
            assert!(matches!(
                config.validate(false, &settings()),
                Err(M2mConfigError::InvalidMapping { .. })
            ));
        }
    }

    #[test]
    fn test_deserialize_from_toml_shape() {
        let config: M2mConfig = serde_json::from_value(serde_json::json!({
            "id": "ci",
            "type": "GITHUB_ACTIONS",
            "token_expiration_duration": "5m",
            "mappings": [{"key": "repository", "value_expression": "x", "role": "ci"}]
        }))
        .unwrap();
        assert_eq!(config.config_type, M2mConfigType::GithubActions);
        assert_eq!(config.token_expiration_duration, Duration::from_secs(300));
        assert!(config.issuer.is_empty());
    }

    #[test]
    fn test_errors_convert_to_invalid_args() {
        let err: AuthError = M2mConfigError::MissingId.into();
        assert!(err.is_invalid_args());
    }
}
