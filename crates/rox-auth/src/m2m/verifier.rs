//! Verification of externally issued tokens presented for exchange.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::M2mSettings;
use crate::error::{AuthError, AuthResult};
use crate::m2m::config::{M2mConfig, M2mConfigType};
use crate::m2m::issuer::unverified_claims;
use crate::m2m::kube::KubeApi;
use crate::oidc::discovery::http_client;
use crate::oidc::{DiscoveryCache, IdTokenVerifier, IssuerUrl, JwksCache, JwksCacheConfig};

/// Checks a raw token and returns its trusted claims.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, raw: &str) -> AuthResult<Map<String, Value>>;
}

/// Builds the verifier for one config.
pub trait TokenVerifierFactory: Send + Sync {
    /// # Errors
    /// Returns `InvalidArgs` if the config's issuer cannot be used.
    fn create(&self, config: &M2mConfig) -> AuthResult<Arc<dyn TokenVerifier>>;
}

/// Verifies ID tokens against the issuer's discovery document and key set.
pub struct OidcTokenVerifier {
    issuer: IssuerUrl,
    discovery: Arc<DiscoveryCache>,
    jwks: Arc<JwksCache>,
}

#[async_trait]
impl TokenVerifier for OidcTokenVerifier {
    async fn verify(&self, raw: &str) -> AuthResult<Map<String, Value>> {
        let metadata = self.discovery.get(&self.issuer).await?;
        let verifier = IdTokenVerifier::new(
            metadata.issuer.clone(),
            None,
            metadata.jwks_url()?,
            Arc::clone(&self.jwks),
        );
        Ok(verifier.verify(raw).await?)
    }
}

/// Verifies service account tokens through the cluster's TokenReview API.
pub struct KubeTokenReviewVerifier {
    api: Arc<dyn KubeApi>,
}

impl KubeTokenReviewVerifier {
    #[must_use]
    pub fn new(api: Arc<dyn KubeApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl TokenVerifier for KubeTokenReviewVerifier {
    async fn verify(&self, raw: &str) -> AuthResult<Map<String, Value>> {
        let status = self.api.review_token(raw).await?;
        if !status.authenticated {
            return Err(AuthError::no_credentials(format!(
                "token review did not authenticate the token: {}",
                status.error
            )));
        }
        let user = status
            .user
            .ok_or_else(|| AuthError::no_credentials("token review returned no user"))?;

        let mut claims = Map::new();
        // Opaque tokens carry nothing beyond what the review returned.
        if let Ok(payload) = unverified_claims(raw) {
            for key in ["iss", "aud", "kubernetes.io"] {
                if let Some(value) = payload.get(key) {
                    claims.insert(key.to_string(), value.clone());
                }
            }
        }
        claims.insert("sub".to_string(), json!(user.username));
        claims.insert("uid".to_string(), json!(user.uid));
        claims.insert("groups".to_string(), json!(user.groups));
        if !user.extra.is_empty() {
            claims.insert("extra".to_string(), json!(user.extra));
        }
        debug!(subject = %user.username, "Service account token reviewed");
        Ok(claims)
    }
}

/// Verifier factory backed by real HTTP clients.
///
/// Discovery documents and key sets are cached across all exchangers.
pub struct NetworkVerifierFactory {
    discovery: Arc<DiscoveryCache>,
    jwks: Arc<JwksCache>,
    kube: Arc<dyn KubeApi>,
    allow_http: bool,
}

impl NetworkVerifierFactory {
    /// # Errors
    /// Returns `Internal` if the HTTP client cannot be built.
    pub fn new(settings: &M2mSettings, kube: Arc<dyn KubeApi>) -> AuthResult<Self> {
        let client = http_client(settings.request_timeout, false)?;
        let jwks = JwksCache::new(
            client.clone(),
            JwksCacheConfig {
                allow_http: settings.allow_http,
                ..JwksCacheConfig::default()
            },
        );
        Ok(Self {
            discovery: Arc::new(DiscoveryCache::new(
                client,
                JwksCacheConfig::default().default_ttl,
            )),
            jwks: Arc::new(jwks),
            kube,
            allow_http: settings.allow_http,
        })
    }
}

impl TokenVerifierFactory for NetworkVerifierFactory {
    fn create(&self, config: &M2mConfig) -> AuthResult<Arc<dyn TokenVerifier>> {
        match config.config_type {
            M2mConfigType::KubeServiceAccount => {
                Ok(Arc::new(KubeTokenReviewVerifier::new(Arc::clone(&self.kube))))
            }
            M2mConfigType::Generic | M2mConfigType::GithubActions => {
                let issuer = IssuerUrl::parse(&config.issuer, self.allow_http)?;
                Ok(Arc::new(OidcTokenVerifier {
                    issuer,
                    discovery: Arc::clone(&self.discovery),
                    jwks: Arc::clone(&self.jwks),
                }))
            }
        }
    }
}
