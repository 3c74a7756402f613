//! Auth subsystem configuration.
//!
//! Everything here deserializes from the `[auth]` table of the server config
//! file. Durations use humantime notation (`"12h"`, `"5m"`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for providers, tokens and M2M exchange.
///
/// # Example (TOML)
///
/// ```toml
/// [auth]
/// issuer_id = "https://stackrox.io/jwt"
/// url_path_prefix = "/sso/providers"
///
/// [auth.tokens]
/// default_ttl = "12h"
///
/// [auth.oidc]
/// nonce_ttl = "5m"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// System ID written to the `iss` claim of every issued token.
    pub issuer_id: String,

    /// Prefix under which provider callbacks and the login endpoint are served.
    pub url_path_prefix: String,

    /// Fixed UI location that receives login results in the URL fragment.
    pub redirect_url: String,

    /// Prefix of the session endpoints (token refresh, logout).
    /// The refresh-token cookie is scoped to this path.
    pub session_path_prefix: String,

    /// Token lifetime settings.
    pub tokens: TokenConfig,

    /// Token signing configuration.
    pub signing: SigningConfig,

    /// OIDC backend settings.
    pub oidc: OidcSettings,

    /// Machine-to-machine exchange settings.
    pub m2m: M2mSettings,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer_id: "https://stackrox.io/jwt".to_string(),
            url_path_prefix: "/sso/providers".to_string(),
            redirect_url: "/auth/response/generic".to_string(),
            session_path_prefix: "/sso/session".to_string(),
            tokens: TokenConfig::default(),
            signing: SigningConfig::default(),
            oidc: OidcSettings::default(),
            m2m: M2mSettings::default(),
        }
    }
}

/// Token lifetime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Lifetime applied when neither the caller nor the issuer set an expiry.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Upper bound on every issued token.
    #[serde(with = "humantime_serde")]
    pub max_ttl: Duration,

    /// Clock skew tolerated when validating `exp`.
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(12 * 3600),
            max_ttl: Duration::from_secs(24 * 3600),
            leeway: Duration::from_secs(60),
        }
    }
}

/// Token signing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing algorithm.
    /// Supported: "RS256", "RS384", "ES384"
    pub algorithm: String,

    /// PEM-encoded private key. A fresh key pair is generated when unset.
    pub private_key_path: Option<PathBuf>,

    /// PEM-encoded public key matching `private_key_path`.
    pub public_key_path: Option<PathBuf>,

    /// Key ID placed in the JWT header.
    pub key_id: Option<String>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: "ES384".to_string(),
            private_key_path: None,
            public_key_path: None,
            key_id: None,
        }
    }
}

/// OIDC backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OidcSettings {
    /// Timeout for discovery, JWKS, token and userinfo requests.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// How long an issued login nonce stays redeemable.
    #[serde(with = "humantime_serde")]
    pub nonce_ttl: Duration,

    /// How long fetched discovery documents and key sets are reused.
    #[serde(with = "humantime_serde")]
    pub metadata_cache_ttl: Duration,

    /// Lifetime assumed for access tokens returned without `expires_in`.
    #[serde(with = "humantime_serde")]
    pub default_access_token_ttl: Duration,

    /// Accept plain `http://` issuers. Only meant for local test fixtures.
    pub allow_http: bool,
}

impl Default for OidcSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            nonce_ttl: Duration::from_secs(300),
            metadata_cache_ttl: Duration::from_secs(3600),
            default_access_token_ttl: Duration::from_secs(3600),
            allow_http: false,
        }
    }
}

/// Machine-to-machine exchange configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct M2mSettings {
    /// Timeout for ID token verification calls (discovery, JWKS, TokenReview).
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Base URL of the in-cluster Kubernetes API server.
    pub kubernetes_api_url: String,

    /// Path of the mounted service account token.
    pub service_account_token_path: PathBuf,

    /// CA bundle used to trust the API server. Ignored when the file is absent.
    pub service_account_ca_path: PathBuf,

    /// Shortest token lifetime an M2M config may request.
    #[serde(with = "humantime_serde")]
    pub min_token_expiration: Duration,

    /// Longest token lifetime an M2M config may request.
    #[serde(with = "humantime_serde")]
    pub max_token_expiration: Duration,

    /// Accept plain `http://` issuers. Only meant for local test fixtures.
    pub allow_http: bool,
}

impl Default for M2mSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            kubernetes_api_url: "https://kubernetes.default.svc".to_string(),
            service_account_token_path: PathBuf::from(
                "/var/run/secrets/kubernetes.io/serviceaccount/token",
            ),
            service_account_ca_path: PathBuf::from(
                "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt",
            ),
            min_token_expiration: Duration::from_secs(60),
            max_token_expiration: Duration::from_secs(24 * 3600),
            allow_http: false,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The issuer ID is empty
    /// - A path prefix does not start with `/`
    /// - The signing algorithm is not supported
    /// - Only one half of a PEM key pair is configured
    /// - A token lifetime bound is inverted or zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer_id.is_empty() {
            return Err(ConfigError::Missing("issuer_id".to_string()));
        }

        for (name, prefix) in [
            ("url_path_prefix", &self.url_path_prefix),
            ("session_path_prefix", &self.session_path_prefix),
        ] {
            if !prefix.starts_with('/') {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must start with '/', got '{prefix}'"
                )));
            }
        }

        if self.redirect_url.is_empty() {
            return Err(ConfigError::Missing("redirect_url".to_string()));
        }

        match self.signing.algorithm.as_str() {
            "RS256" | "RS384" | "ES384" => {}
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid signing algorithm: '{}'. Must be RS256, RS384, or ES384",
                    other
                )));
            }
        }

        if self.signing.private_key_path.is_some() != self.signing.public_key_path.is_some() {
            return Err(ConfigError::InvalidValue(
                "signing.private_key_path and signing.public_key_path must be set together"
                    .to_string(),
            ));
        }

        if self.tokens.default_ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "tokens.default_ttl must be > 0".to_string(),
            ));
        }
        if self.tokens.default_ttl > self.tokens.max_ttl {
            return Err(ConfigError::InvalidValue(
                "tokens.default_ttl must be <= tokens.max_ttl".to_string(),
            ));
        }

        if self.oidc.nonce_ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "oidc.nonce_ttl must be > 0".to_string(),
            ));
        }

        if self.m2m.min_token_expiration > self.m2m.max_token_expiration {
            return Err(ConfigError::InvalidValue(
                "m2m.min_token_expiration must be <= m2m.max_token_expiration".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert_eq!(config.issuer_id, "https://stackrox.io/jwt");
        assert_eq!(config.url_path_prefix, "/sso/providers");
        assert_eq!(config.signing.algorithm, "ES384");
        assert_eq!(config.m2m.max_token_expiration, Duration::from_secs(86400));
    }

    #[test]
    fn test_default_config_validates() {
        assert!(AuthConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_issuer_fails_validation() {
        let mut config = AuthConfig::default();
        config.issuer_id = String::new();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_invalid_algorithm_fails_validation() {
        let mut config = AuthConfig::default();
        config.signing.algorithm = "HS256".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
        assert!(err.to_string().contains("signing algorithm"));
    }

    #[test]
    fn test_half_configured_key_pair_fails_validation() {
        let mut config = AuthConfig::default();
        config.signing.private_key_path = Some(PathBuf::from("/keys/private.pem"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relative_prefix_fails_validation() {
        let mut config = AuthConfig::default();
        config.url_path_prefix = "sso/providers".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("url_path_prefix"));
    }

    #[test]
    fn test_deserialize_humantime() {
        let json = r#"{
            "issuer_id": "https://central.example.com/jwt",
            "tokens": { "default_ttl": "30m", "max_ttl": "2h" },
            "oidc": { "nonce_ttl": "90s", "allow_http": true }
        }"#;
        let config: AuthConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tokens.default_ttl, Duration::from_secs(1800));
        assert_eq!(config.tokens.max_ttl, Duration::from_secs(7200));
        assert_eq!(config.oidc.nonce_ttl, Duration::from_secs(90));
        assert!(config.oidc.allow_http);
        assert_eq!(config.url_path_prefix, "/sso/providers");
        assert!(config.validate().is_ok());
    }
}
