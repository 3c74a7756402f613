//! The set of configured exchangers, keyed by issuer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::M2mSettings;
use crate::error::{AuthError, AuthResult, ResultExt};
use crate::m2m::config::{M2mConfig, M2mConfigType};
use crate::m2m::exchanger::TokenExchanger;
use crate::m2m::issuer::{LEGACY_KUBE_ISSUER, issuer_from_raw_id_token};
use crate::m2m::kube::KubeApi;
use crate::m2m::verifier::TokenVerifierFactory;
use crate::roles::RoleDataStore;
use crate::tokens::IssuerFactory;

/// All exchangers of the process.
///
/// Mutations are serialized by the write lock, which is held while the
/// replacement exchanger is built.
pub struct TokenExchangerSet {
    exchangers: RwLock<HashMap<String, Arc<TokenExchanger>>>,
    verifiers: Arc<dyn TokenVerifierFactory>,
    kube: Arc<dyn KubeApi>,
    issuers: IssuerFactory,
    roles: Arc<dyn RoleDataStore>,
    settings: M2mSettings,
}

impl TokenExchangerSet {
    #[must_use]
    pub fn new(
        settings: M2mSettings,
        verifiers: Arc<dyn TokenVerifierFactory>,
        kube: Arc<dyn KubeApi>,
        issuers: IssuerFactory,
        roles: Arc<dyn RoleDataStore>,
    ) -> Self {
        Self {
            exchangers: RwLock::new(HashMap::new()),
            verifiers,
            kube,
            issuers,
            roles,
            settings,
        }
    }

    /// Validates `config` and installs an exchanger for it.
    ///
    /// Any exchanger with the same config ID or issuer is replaced and its
    /// token source unregistered. If building the replacement fails after
    /// that, the old exchanger is gone; restore it with
    /// [`rollback_exchanger`](Self::rollback_exchanger).
    ///
    /// # Errors
    /// `InvalidArgs` for an invalid config; errors from issuer discovery or
    /// exchanger construction otherwise.
    pub async fn upsert(&self, config: M2mConfig) -> AuthResult<()> {
        let mut config = config.normalize();
        config.validate(false, &self.settings)?;
        if config.config_type == M2mConfigType::KubeServiceAccount && config.issuer.is_empty() {
            config.issuer = self
                .kube
                .service_account_issuer()
                .await
                .context("discovering the service account issuer")?;
        }
        let verifier = self.verifiers.create(&config)?;

        let mut exchangers = self.exchangers.write().await;
        exchangers.retain(|issuer, existing| {
            let replaced = *issuer == config.issuer || existing.config().id == config.id;
            if replaced {
                existing.unregister(&self.issuers);
            }
            !replaced
        });

        let issuer = config.issuer.clone();
        let id = config.id.clone();
        let exchanger =
            TokenExchanger::new(config, verifier, &self.issuers, Arc::clone(&self.roles))
                .await
                .with_context(|| format!("creating token exchanger {id:?}"))?;
        exchangers.insert(issuer.clone(), Arc::new(exchanger));
        info!(config_id = %id, issuer = %issuer, "Installed token exchanger");
        Ok(())
    }

    /// Removes the exchanger of `config_id`, if any.
    pub async fn remove(&self, config_id: &str) {
        let mut exchangers = self.exchangers.write().await;
        exchangers.retain(|_, existing| {
            let removed = existing.config().id == config_id;
            if removed {
                existing.unregister(&self.issuers);
                info!(config_id = %config_id, "Removed token exchanger");
            }
            !removed
        });
    }

    /// Restores the state of `config_id` to the last applied config.
    ///
    /// `previous` is the config as stored before a failed change, or `None`
    /// if there was none.
    ///
    /// # Errors
    /// Errors from re-installing `previous`.
    pub async fn rollback_exchanger(
        &self,
        config_id: &str,
        previous: Option<M2mConfig>,
    ) -> AuthResult<()> {
        warn!(config_id = %config_id, "Rolling back token exchanger");
        match previous {
            Some(config) => self.upsert(config).await,
            None => {
                self.remove(config_id).await;
                Ok(())
            }
        }
    }

    /// Exchanger for tokens claiming `issuer`.
    ///
    /// Opaque service account tokens carry no issuer of their own and go to
    /// the first Kubernetes exchanger.
    pub async fn get_token_exchanger(&self, issuer: &str) -> Option<Arc<TokenExchanger>> {
        let exchangers = self.exchangers.read().await;
        if let Some(exchanger) = exchangers.get(issuer) {
            return Some(Arc::clone(exchanger));
        }
        if issuer != LEGACY_KUBE_ISSUER {
            return None;
        }
        exchangers
            .values()
            .find(|e| e.config().config_type == M2mConfigType::KubeServiceAccount)
            .cloned()
    }

    pub async fn has_exchanger(&self, config_id: &str) -> bool {
        self.exchangers
            .read()
            .await
            .values()
            .any(|e| e.config().id == config_id)
    }

    /// Configs of all installed exchangers, ordered by ID.
    pub async fn exchanger_configs(&self) -> Vec<M2mConfig> {
        let mut configs: Vec<M2mConfig> = self
            .exchangers
            .read()
            .await
            .values()
            .map(|e| e.config().clone())
            .collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        configs
    }

    /// Exchanges a raw external token for a platform token.
    ///
    /// # Errors
    /// - `InvalidArgs` if the token is malformed or no exchanger trusts its issuer
    /// - `NoCredentials` if the exchange itself fails
    pub async fn exchange(&self, raw: &str) -> AuthResult<String> {
        let issuer = issuer_from_raw_id_token(raw).context("could not parse ID token")?;
        let exchanger = self.get_token_exchanger(&issuer).await.ok_or_else(|| {
            AuthError::invalid_args(format!("no token exchanger found for issuer {issuer:?}"))
        })?;
        exchanger.exchange_token(raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authproviders::testutil::issuer_factory;
    use crate::m2m::config::GITHUB_ACTIONS_ISSUER;
    use crate::m2m::exchanger::tests::{JsonVerifier, github_config, role_store};
    use crate::m2m::kube::TokenReviewStatus;
    use crate::m2m::verifier::TokenVerifier;
    use crate::roles::Mapping;
    use async_trait::async_trait;
    use std::time::Duration;

    struct JsonVerifiers;

    impl TokenVerifierFactory for JsonVerifiers {
        fn create(&self, _config: &M2mConfig) -> AuthResult<Arc<dyn TokenVerifier>> {
            Ok(Arc::new(JsonVerifier))
        }
    }

    struct ClusterIssuer;

    #[async_trait]
    impl KubeApi for ClusterIssuer {
        async fn review_token(&self, _token: &str) -> AuthResult<TokenReviewStatus> {
            Err(AuthError::internal("not used"))
        }

        async fn service_account_issuer(&self) -> AuthResult<String> {
            Ok("https://kubernetes.default.svc".to_string())
        }
    }

    fn set(issuers: &IssuerFactory) -> TokenExchangerSet {
        TokenExchangerSet::new(
            M2mSettings::default(),
            Arc::new(JsonVerifiers),
            Arc::new(ClusterIssuer),
            issuers.clone(),
            role_store(),
        )
    }

    fn kube_config(id: &str) -> M2mConfig {
        M2mConfig {
            id: id.to_string(),
            config_type: M2mConfigType::KubeServiceAccount,
            token_expiration_duration: Duration::from_secs(300),
            issuer: String::new(),
            mappings: vec![Mapping::new("sub", ".*", "ci")],
        }
    }

    #[tokio::test]
    async fn test_upsert_and_lookup_by_issuer() {
        let issuers = issuer_factory();
        let set = set(&issuers);
        set.upsert(github_config("gha")).await.unwrap();

        assert!(set.has_exchanger("gha").await);
        assert!(set.get_token_exchanger(GITHUB_ACTIONS_ISSUER).await.is_some());
        assert!(set.get_token_exchanger("https://other").await.is_none());
        assert!(issuers.has_source("gha"));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let issuers = issuer_factory();
        let set = set(&issuers);
        let mut config = github_config("gha");
        config.token_expiration_duration = Duration::from_secs(1);
        assert!(set.upsert(config).await.unwrap_err().is_invalid_args());
        assert!(set.exchanger_configs().await.is_empty());
    }

    #[tokio::test]
    async fn test_replace_unregisters_previous_source() {
        let issuers = issuer_factory();
        let set = set(&issuers);
        set.upsert(github_config("gha")).await.unwrap();
        let old = set.get_token_exchanger(GITHUB_ACTIONS_ISSUER).await.unwrap();

        let mut updated = github_config("gha");
        updated.token_expiration_duration = Duration::from_secs(600);
        set.upsert(updated).await.unwrap();

        let configs = set.exchanger_configs().await;
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].token_expiration_duration, Duration::from_secs(600));
        assert!(!Arc::ptr_eq(
            &old,
            &set.get_token_exchanger(GITHUB_ACTIONS_ISSUER).await.unwrap()
        ));
        assert!(issuers.has_source("gha"));
    }

    #[tokio::test]
    async fn test_remove_and_rollback() {
        let issuers = issuer_factory();
        let set = set(&issuers);
        set.upsert(github_config("gha")).await.unwrap();

        set.remove("gha").await;
        assert!(!set.has_exchanger("gha").await);
        assert!(!issuers.has_source("gha"));

        set.rollback_exchanger("gha", Some(github_config("gha")))
            .await
            .unwrap();
        assert!(set.has_exchanger("gha").await);

        set.rollback_exchanger("gha", None).await.unwrap();
        assert!(!set.has_exchanger("gha").await);
    }

    #[tokio::test]
    async fn test_kube_issuer_discovered_and_legacy_fallback() {
        let issuers = issuer_factory();
        let set = set(&issuers);
        set.upsert(kube_config("kube")).await.unwrap();

        let configs = set.exchanger_configs().await;
        assert_eq!(configs[0].issuer, "https://kubernetes.default.svc");
        let exchanger = set.get_token_exchanger(LEGACY_KUBE_ISSUER).await.unwrap();
        assert_eq!(exchanger.config().id, "kube");
    }

    #[tokio::test]
    async fn test_exchange_routes_by_issuer() {
        let issuers = issuer_factory();
        let set = set(&issuers);
        let err = set.exchange("not-a-token").await.unwrap_err();
        assert!(err.is_invalid_args());

        let raw = crate::m2m::issuer::unsigned_token(&serde_json::json!({
            "iss": GITHUB_ACTIONS_ISSUER,
            "sub": "x"
        }));
        let err = set.exchange(&raw).await.unwrap_err();
        assert!(err.is_invalid_args());

        set.upsert(github_config("gha")).await.unwrap();
        // JsonVerifier cannot parse a compact JWT, so the exchange itself fails.
        let err = set.exchange(&raw).await.unwrap_err();
        assert!(err.is_no_credentials());
    }
}
