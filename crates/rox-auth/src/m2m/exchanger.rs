//! Exchange of one verified external token for a platform token.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::authproviders::{BackendFailurePolicy, Provider, ProviderOption};
use crate::error::{AuthError, AuthResult};
use crate::m2m::config::M2mConfig;
use crate::m2m::extractor::ClaimExtractor;
use crate::m2m::verifier::TokenVerifier;
use crate::roles::{AccessContext, RoleDataStore, RoleMatcher, resolve_roles_for_claims};
use crate::tokenbased::{TYPE_NAME as TOKENBASED_TYPE, TokenBasedFactory};
use crate::tokens::{Issuer, IssuerFactory, TokenOption};

const EXCHANGE_FAILED: &str = "could not exchange the presented token";

/// Verifier, extractor, mappings and issuer for one M2M config.
///
/// Tokens are issued on behalf of a token-based provider registered under the
/// config ID, so they validate like any other provider's tokens.
pub struct TokenExchanger {
    config: M2mConfig,
    verifier: Arc<dyn TokenVerifier>,
    extractor: ClaimExtractor,
    matcher: RoleMatcher,
    roles: Arc<dyn RoleDataStore>,
    provider: Arc<Provider>,
    issuer: Issuer,
}

impl TokenExchanger {
    /// Registers the config as a token source and builds its exchanger.
    ///
    /// # Errors
    /// `AlreadyExists` if a source with the config ID is registered, or
    /// whatever the provider construction returns.
    pub async fn new(
        config: M2mConfig,
        verifier: Arc<dyn TokenVerifier>,
        issuers: &IssuerFactory,
        roles: Arc<dyn RoleDataStore>,
    ) -> AuthResult<Self> {
        let provider = Provider::new(vec![
            ProviderOption::WithId(config.id.clone()),
            ProviderOption::WithName(format!("{}-{}", config.config_type, config.id)),
            ProviderOption::WithType(TOKENBASED_TYPE.to_string()),
            ProviderOption::WithEnabled(true),
            ProviderOption::WithActive(true),
            ProviderOption::WithBackendFactory(Arc::new(TokenBasedFactory)),
            ProviderOption::DefaultBackend(BackendFailurePolicy::Fail),
            ProviderOption::DefaultTokenIssuer {
                factory: issuers.clone(),
                options: vec![TokenOption::Ttl(config.token_expiration_duration)],
            },
        ])
        .await?;
        let issuer = provider.issuer().ok_or_else(|| {
            AuthError::invariant_violation("token-based provider was built without an issuer")
        })?;

        Ok(Self {
            extractor: ClaimExtractor::from(config.config_type),
            matcher: RoleMatcher::new(&config.mappings),
            config,
            verifier,
            roles,
            provider,
            issuer,
        })
    }

    #[must_use]
    pub fn config(&self) -> &M2mConfig {
        &self.config
    }

    /// Provider the issued tokens name as their source.
    #[must_use]
    pub fn provider(&self) -> &Arc<Provider> {
        &self.provider
    }

    /// Verifies `raw` and issues a platform token for it.
    ///
    /// # Errors
    /// Always `NoCredentials`; the failing stage is only logged.
    pub async fn exchange_token(&self, raw: &str) -> AuthResult<String> {
        match self.try_exchange(raw).await {
            Ok(token) => Ok(token),
            Err(err) => {
                warn!(config_id = %self.config.id, error = %err, "M2M token exchange failed");
                Err(AuthError::no_credentials(EXCHANGE_FAILED))
            }
        }
    }

    async fn try_exchange(&self, raw: &str) -> AuthResult<String> {
        let claims = self.verifier.verify(raw).await?;
        let attributes = self.extractor.attributes(&claims);

        let ctx = AccessContext::elevated("resolving roles for M2M token exchange");
        let roles =
            resolve_roles_for_claims(&ctx, &attributes, &self.matcher, self.roles.as_ref())
                .await?;
        if roles.is_empty() {
            return Err(AuthError::no_credentials("no valid role for the presented claims"));
        }

        let mut rox = self.extractor.rox_claims(&claims, attributes)?;
        rox.role_names = roles.into_iter().map(|role| role.name).collect();
        let info = self.issuer.issue(rox, &[])?;
        debug!(
            config_id = %self.config.id,
            roles = ?info.claims.rox.role_names,
            "Issued token for M2M exchange"
        );
        Ok(info.token)
    }

    /// Removes the token source. Tokens issued by this exchanger stop validating.
    pub(crate) fn unregister(&self, issuers: &IssuerFactory) {
        if let Err(err) = issuers.unregister_source(&self.config.id) {
            debug!(config_id = %self.config.id, error = %err, "Token source already gone");
        }
    }
}

impl fmt::Debug for TokenExchanger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenExchanger")
            .field("config", &self.config)
            .field("extractor", &self.extractor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::authproviders::testutil::issuer_factory;
    use crate::m2m::config::{GITHUB_ACTIONS_ISSUER, M2mConfigType};
    use crate::roles::{InMemoryRoleStore, Mapping, ResolvedRole};
    use async_trait::async_trait;
    use serde_json::{Map, Value, json};
    use std::time::Duration;

    /// Accepts any token whose text is a JSON object and returns it as claims.
    pub(crate) struct JsonVerifier;

    #[async_trait]
    impl TokenVerifier for JsonVerifier {
        async fn verify(&self, raw: &str) -> AuthResult<Map<String, Value>> {
            serde_json::from_str(raw).map_err(|_| AuthError::no_credentials("bad signature"))
        }
    }

    pub(crate) fn github_config(id: &str) -> M2mConfig {
        M2mConfig {
            id: id.to_string(),
            config_type: M2mConfigType::GithubActions,
            token_expiration_duration: Duration::from_secs(300),
            issuer: GITHUB_ACTIONS_ISSUER.to_string(),
            mappings: vec![Mapping::new("repository", "github.com/acme/widget.*", "ci")],
        }
    }

    pub(crate) fn role_store() -> Arc<dyn RoleDataStore> {
        Arc::new(InMemoryRoleStore::with_roles([ResolvedRole::named("ci")]))
    }

    async fn exchanger(issuers: &IssuerFactory) -> TokenExchanger {
        TokenExchanger::new(
            github_config("gha"),
            Arc::new(JsonVerifier),
            issuers,
            role_store(),
        )
        .await
        .unwrap()
    }

    fn github_token(repository: &str) -> String {
        json!({
            "iss": GITHUB_ACTIONS_ISSUER,
            "sub": "repo:acme/widget:ref:refs/heads/main",
            "actor": "octocat",
            "repository": repository
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_matching_repository_gets_ci_role() {
        let issuers = issuer_factory();
        let exchanger = exchanger(&issuers).await;

        let token = exchanger
            .exchange_token(&github_token("github.com/acme/widget:main:abc123"))
            .await
            .unwrap();
        let info = issuers.validator().validate(&token).unwrap();
        assert_eq!(info.claims.rox.role_names, ["ci"]);
        assert_eq!(info.claims.sub, "gha");
        assert_eq!(info.claims.exp - info.claims.iat, 300);
        let user = info.claims.rox.external_user.unwrap();
        assert_eq!(user.full_name, "octocat");
    }

    #[tokio::test]
    async fn test_other_repository_is_rejected() {
        let issuers = issuer_factory();
        let exchanger = exchanger(&issuers).await;
        let err = exchanger
            .exchange_token(&github_token("github.com/other/x"))
            .await
            .unwrap_err();
        assert!(err.is_no_credentials());
        assert!(err.to_string().contains(EXCHANGE_FAILED));
    }

    #[tokio::test]
    async fn test_verification_failure_collapses_to_no_credentials() {
        let issuers = issuer_factory();
        let exchanger = exchanger(&issuers).await;
        let err = exchanger.exchange_token("garbage").await.unwrap_err();
        assert!(err.is_no_credentials());
        assert!(!err.to_string().contains("bad signature"));
    }

    #[tokio::test]
    async fn test_missing_role_collapses_to_no_credentials() {
        let issuers = issuer_factory();
        let exchanger = TokenExchanger::new(
            github_config("gha"),
            Arc::new(JsonVerifier),
            &issuers,
            Arc::new(InMemoryRoleStore::new()),
        )
        .await
        .unwrap();
        let err = exchanger
            .exchange_token(&github_token("github.com/acme/widget"))
            .await
            .unwrap_err();
        assert!(err.is_no_credentials());
    }

    #[tokio::test]
    async fn test_unregister_invalidates_issued_tokens() {
        let issuers = issuer_factory();
        let exchanger = exchanger(&issuers).await;
        let token = exchanger
            .exchange_token(&github_token("github.com/acme/widget"))
            .await
            .unwrap();
        exchanger.unregister(&issuers);
        assert!(issuers.validator().validate(&token).is_err());
        assert!(!issuers.has_source("gha"));
    }
}
