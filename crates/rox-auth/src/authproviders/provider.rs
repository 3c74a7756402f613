//! Runtime auth providers.
//!
//! A [`Provider`] binds one [`AuthProviderConfig`] to a backend, a role
//! mapper and a token issuer. Its state is only changed by applying a batch
//! of [`ProviderOption`]s to a copy of the current state. The copy replaces
//! the live state only when every option succeeded; otherwise the side
//! effects of the options already applied are undone in reverse order.
//!
//! # Example
//!
//! ```ignore
//! let provider = Provider::new(vec![
//!     ProviderOption::WithType("oidc".into()),
//!     ProviderOption::WithName("Corp SSO".into()),
//!     ProviderOption::DefaultNewId,
//!     ProviderOption::WithBackendFactory(factory),
//!     ProviderOption::DefaultBackend(BackendFailurePolicy::Fail),
//!     ProviderOption::DefaultTokenIssuer { factory: issuers, options: vec![] },
//!     ProviderOption::AddToStore(store),
//! ])
//! .await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::backend::{Backend, BackendFactory};
use super::store::AuthProviderStore;
use super::types::{AuthProviderConfig, RequiredAttribute};
use crate::error::{AuthError, AuthResult, ResultExt};
use crate::roles::{ClaimAttributes, RoleMapper, RoleMapperFactory};
use crate::tokens::{Claims, Issuer, IssuerFactory, RevocationLayer, Source, TokenOption};

// ============================================================================
// State
// ============================================================================

/// Immutable snapshot of a provider.
#[derive(Clone, Default)]
pub struct ProviderState {
    pub config: AuthProviderConfig,
    pub backend: Option<Arc<dyn Backend>>,
    pub backend_factory: Option<Arc<dyn BackendFactory>>,
    pub role_mapper: Option<Arc<dyn RoleMapper>>,
    pub issuer: Option<Issuer>,
    pub login_url: Option<String>,
}

impl fmt::Debug for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderState")
            .field("config", &self.config)
            .field("has_backend", &self.backend.is_some())
            .field("has_role_mapper", &self.role_mapper.is_some())
            .field("issuer", &self.issuer)
            .field("login_url", &self.login_url)
            .finish_non_exhaustive()
    }
}

/// What to do when [`ProviderOption::DefaultBackend`] cannot build a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendFailurePolicy {
    /// Abort the batch. Used for newly created providers.
    Fail,
    /// Keep the provider without a backend. Used when loading at startup.
    LogAndIgnore,
}

// ============================================================================
// Options
// ============================================================================

/// One step of a provider mutation.
///
/// `Default*` options only fill in values that are still unset, so the same
/// list serves both freshly created providers and providers loaded from the
/// store.
pub enum ProviderOption {
    WithId(String),
    DefaultNewId,
    WithType(String),
    WithName(String),
    WithEnabled(bool),
    WithActive(bool),
    WithValidated(bool),
    WithUiEndpoints(Vec<String>),
    WithExtraUiEndpoints(Vec<String>),
    WithConfig(HashMap<String, String>),
    WithClaimMappings(HashMap<String, String>),
    WithRequiredAttributes(Vec<RequiredAttribute>),
    /// Replace the whole stored view at once.
    WithStorageView(AuthProviderConfig),
    TouchLastUpdated,
    /// Set the login URL to `<prefix>/<id>` unless one is set.
    DefaultLoginUrl(String),
    WithBackendFactory(Arc<dyn BackendFactory>),
    WithBackend(Arc<dyn Backend>),
    /// Build a backend through the factory unless one is set.
    DefaultBackend(BackendFailurePolicy),
    /// Build a new backend through the factory, replacing the current one.
    RecreateBackend,
    WithRoleMapper(Arc<dyn RoleMapper>),
    DefaultRoleMapper(Arc<dyn RoleMapperFactory>),
    /// Register the provider as a token source unless it has an issuer.
    DefaultTokenIssuer {
        factory: IssuerFactory,
        options: Vec<TokenOption>,
    },
    AddToStore(Arc<dyn AuthProviderStore>),
    UpdateStore(Arc<dyn AuthProviderStore>),
}

impl ProviderOption {
    fn name(&self) -> &'static str {
        match self {
            Self::WithId(_) => "WithId",
            Self::DefaultNewId => "DefaultNewId",
            Self::WithType(_) => "WithType",
            Self::WithName(_) => "WithName",
            Self::WithEnabled(_) => "WithEnabled",
            Self::WithActive(_) => "WithActive",
            Self::WithValidated(_) => "WithValidated",
            Self::WithUiEndpoints(_) => "WithUiEndpoints",
            Self::WithExtraUiEndpoints(_) => "WithExtraUiEndpoints",
            Self::WithConfig(_) => "WithConfig",
            Self::WithClaimMappings(_) => "WithClaimMappings",
            Self::WithRequiredAttributes(_) => "WithRequiredAttributes",
            Self::WithStorageView(_) => "WithStorageView",
            Self::TouchLastUpdated => "TouchLastUpdated",
            Self::DefaultLoginUrl(_) => "DefaultLoginUrl",
            Self::WithBackendFactory(_) => "WithBackendFactory",
            Self::WithBackend(_) => "WithBackend",
            Self::DefaultBackend(_) => "DefaultBackend",
            Self::RecreateBackend => "RecreateBackend",
            Self::WithRoleMapper(_) => "WithRoleMapper",
            Self::DefaultRoleMapper(_) => "DefaultRoleMapper",
            Self::DefaultTokenIssuer { .. } => "DefaultTokenIssuer",
            Self::AddToStore(_) => "AddToStore",
            Self::UpdateStore(_) => "UpdateStore",
        }
    }

    async fn apply(
        self,
        provider: &Arc<Provider>,
        mut draft: ProviderState,
    ) -> AuthResult<(ProviderState, Option<Undo>)> {
        let mut undo = None;
        match self {
            Self::WithId(id) => draft.config.id = id,
            Self::DefaultNewId => {
                if draft.config.id.is_empty() {
                    draft.config.id = uuid::Uuid::new_v4().to_string();
                }
            }
            Self::WithType(provider_type) => draft.config.provider_type = provider_type,
            Self::WithName(name) => draft.config.name = name,
            Self::WithEnabled(enabled) => draft.config.enabled = enabled,
            Self::WithActive(active) => draft.config.active = active,
            Self::WithValidated(validated) => draft.config.validated = validated,
            Self::WithUiEndpoints(endpoints) => draft.config.ui_endpoints = endpoints,
            Self::WithExtraUiEndpoints(endpoints) => draft.config.extra_ui_endpoints = endpoints,
            Self::WithConfig(config) => draft.config.config = config,
            Self::WithClaimMappings(mappings) => draft.config.claim_mappings = mappings,
            Self::WithRequiredAttributes(attrs) => draft.config.required_attributes = attrs,
            Self::WithStorageView(config) => draft.config = config,
            Self::TouchLastUpdated => draft.config.last_updated = Some(OffsetDateTime::now_utc()),
            Self::DefaultLoginUrl(prefix) => {
                if draft.login_url.is_none() {
                    require_id(&draft)?;
                    draft.login_url = Some(format!(
                        "{}/{}",
                        prefix.trim_end_matches('/'),
                        draft.config.id
                    ));
                }
            }
            Self::WithBackendFactory(factory) => draft.backend_factory = Some(factory),
            Self::WithBackend(backend) => draft.backend = Some(backend),
            Self::DefaultBackend(policy) => {
                if draft.backend.is_none() {
                    match build_backend(&draft).await {
                        Ok(backend) => install_backend(&mut draft, backend),
                        Err(err) if policy == BackendFailurePolicy::LogAndIgnore => {
                            warn!(
                                provider_id = %draft.config.id,
                                provider_type = %draft.config.provider_type,
                                error = %err,
                                "Could not create auth provider backend, provider stays unusable"
                            );
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
            Self::RecreateBackend => {
                let backend = build_backend(&draft).await?;
                install_backend(&mut draft, backend);
            }
            Self::WithRoleMapper(mapper) => draft.role_mapper = Some(mapper),
            Self::DefaultRoleMapper(factory) => {
                if draft.role_mapper.is_none() {
                    require_id(&draft)?;
                    draft.role_mapper = Some(factory.role_mapper(&draft.config.id));
                }
            }
            Self::DefaultTokenIssuer { factory, options } => {
                if draft.issuer.is_none() {
                    require_id(&draft)?;
                    let source: Arc<dyn Source> = provider.clone();
                    let issuer = factory
                        .create_issuer_for(draft.config.id.clone(), Arc::downgrade(&source), options)
                        .with_context(|| {
                            format!("creating token issuer for provider {}", draft.config.id)
                        })?;
                    undo = Some(Undo::UnregisterSource {
                        factory,
                        source_id: draft.config.id.clone(),
                    });
                    draft.issuer = Some(issuer);
                }
            }
            Self::AddToStore(store) => {
                require_id(&draft)?;
                store.add_auth_provider(&draft.config).await?;
                undo = Some(Undo::RemoveFromStore {
                    store,
                    id: draft.config.id.clone(),
                });
            }
            Self::UpdateStore(store) => {
                require_id(&draft)?;
                let previous = store.get_auth_provider(&draft.config.id).await?;
                store.update_auth_provider(&draft.config).await?;
                undo = previous.map(|previous| Undo::RestoreStored { store, previous });
            }
        }
        Ok((draft, undo))
    }
}

impl fmt::Debug for ProviderOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn require_id(draft: &ProviderState) -> AuthResult<()> {
    if draft.config.id.is_empty() {
        return Err(AuthError::invalid_args("auth provider has no ID"));
    }
    Ok(())
}

async fn build_backend(draft: &ProviderState) -> AuthResult<Arc<dyn Backend>> {
    let factory = draft.backend_factory.as_ref().ok_or_else(|| {
        AuthError::not_found(format!(
            "no backend factory for auth provider type {:?}",
            draft.config.provider_type
        ))
    })?;
    factory
        .create_backend(
            &draft.config.id,
            &draft.config.all_ui_endpoints(),
            &draft.config.config,
            &draft.config.claim_mappings,
        )
        .await
        .with_context(|| format!("creating backend for provider {}", draft.config.id))
}

fn install_backend(draft: &mut ProviderState, backend: Arc<dyn Backend>) {
    draft.config.config = backend.config();
    draft.backend = Some(backend);
}

/// Compensating action for an option with external side effects.
enum Undo {
    UnregisterSource {
        factory: IssuerFactory,
        source_id: String,
    },
    RemoveFromStore {
        store: Arc<dyn AuthProviderStore>,
        id: String,
    },
    RestoreStored {
        store: Arc<dyn AuthProviderStore>,
        previous: AuthProviderConfig,
    },
}

impl Undo {
    async fn run(self) {
        let result = match self {
            Self::UnregisterSource { factory, source_id } => factory.unregister_source(&source_id),
            Self::RemoveFromStore { store, id } => store.remove_auth_provider(&id, true).await,
            Self::RestoreStored { store, previous } => {
                store.update_auth_provider(&previous).await
            }
        };
        if let Err(err) = result {
            warn!(error = %err, "Rolling back auth provider change failed");
        }
    }
}

// ============================================================================
// Provider
// ============================================================================

/// A configured auth provider.
pub struct Provider {
    state: ArcSwap<ProviderState>,
    apply_lock: tokio::sync::Mutex<()>,
    revocation: RevocationLayer,
}

impl Provider {
    /// Builds a provider by applying `options` to an empty state.
    ///
    /// # Errors
    ///
    /// Returns the first option failure. Side effects of earlier options in
    /// the batch are undone.
    pub async fn new(options: Vec<ProviderOption>) -> AuthResult<Arc<Self>> {
        let provider = Arc::new(Self {
            state: ArcSwap::from_pointee(ProviderState::default()),
            apply_lock: tokio::sync::Mutex::new(()),
            revocation: RevocationLayer::new(),
        });
        provider.apply_options(options).await?;
        Ok(provider)
    }

    /// Applies a batch of options. Either all of them take effect or none.
    ///
    /// # Errors
    ///
    /// Returns the first option failure, after undoing the batch.
    pub async fn apply_options(self: &Arc<Self>, options: Vec<ProviderOption>) -> AuthResult<()> {
        let _guard = self.apply_lock.lock().await;

        let current = self.state.load_full();
        let mut draft = (*current).clone();
        let mut undo_log = Vec::new();

        for option in options {
            let name = option.name();
            match option.apply(self, draft).await {
                Ok((next, undo)) => {
                    draft = next;
                    undo_log.extend(undo);
                }
                Err(err) => {
                    debug!(option = name, error = %err, "Auth provider option failed, rolling back");
                    for undo in undo_log.into_iter().rev() {
                        undo.run().await;
                    }
                    return Err(err);
                }
            }
        }

        let previous_backend = current.backend.clone();
        let next_backend = draft.backend.clone();
        let provider_id = draft.config.id.clone();
        self.state.store(Arc::new(draft));

        let replaced = match (&previous_backend, &next_backend) {
            (Some(prev), Some(next)) => !Arc::ptr_eq(prev, next),
            (None, None) => false,
            _ => true,
        };
        if replaced {
            if let Some(prev) = previous_backend {
                prev.on_disable(&provider_id);
            }
            if let Some(next) = next_backend {
                next.on_enable(&provider_id);
            }
        }
        Ok(())
    }

    /// Current state snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ProviderState> {
        self.state.load_full()
    }

    #[must_use]
    pub fn id(&self) -> String {
        self.state.load().config.id.clone()
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.state.load().config.name.clone()
    }

    #[must_use]
    pub fn provider_type(&self) -> String {
        self.state.load().config.provider_type.clone()
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.state.load().config.enabled
    }

    #[must_use]
    pub fn active(&self) -> bool {
        self.state.load().config.active
    }

    /// The configuration as persisted.
    #[must_use]
    pub fn storage_view(&self) -> AuthProviderConfig {
        self.state.load().config.clone()
    }

    #[must_use]
    pub fn backend(&self) -> Option<Arc<dyn Backend>> {
        self.state.load().backend.clone()
    }

    #[must_use]
    pub fn backend_factory(&self) -> Option<Arc<dyn BackendFactory>> {
        self.state.load().backend_factory.clone()
    }

    #[must_use]
    pub fn role_mapper(&self) -> Option<Arc<dyn RoleMapper>> {
        self.state.load().role_mapper.clone()
    }

    #[must_use]
    pub fn issuer(&self) -> Option<Issuer> {
        self.state.load().issuer.clone()
    }

    #[must_use]
    pub fn login_url(&self) -> Option<String> {
        self.state.load().login_url.clone()
    }

    /// Revoked token IDs of this provider.
    #[must_use]
    pub fn revocation(&self) -> &RevocationLayer {
        &self.revocation
    }

    /// Checks the configured required attributes against a user's attributes.
    ///
    /// # Errors
    ///
    /// `NoCredentials` naming the first attribute that is missing or has a
    /// different value.
    pub fn check_required_attributes(&self, attributes: &ClaimAttributes) -> AuthResult<()> {
        let state = self.state.load();
        for required in &state.config.required_attributes {
            let satisfied = attributes
                .get(&required.attribute_key)
                .is_some_and(|values| values.iter().any(|v| *v == required.attribute_value));
            if !satisfied {
                return Err(AuthError::no_credentials(format!(
                    "required attribute {:?} did not have the required value",
                    required.attribute_key
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("state", &self.state.load())
            .finish_non_exhaustive()
    }
}

impl Source for Provider {
    fn id(&self) -> String {
        Provider::id(self)
    }

    fn validate(&self, claims: &Claims) -> AuthResult<()> {
        let state = self.state.load();
        if !state.config.enabled {
            return Err(AuthError::no_credentials(format!(
                "auth provider {:?} is disabled",
                state.config.name
            )));
        }
        let backend = state
            .backend
            .as_ref()
            .ok_or_else(|| AuthError::no_credentials("auth provider backend not available"))?;
        self.revocation.validate(claims)?;
        backend.validate(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authproviders::store::InMemoryAuthProviderStore;
    use crate::authproviders::testutil::{FailingFactory, StaticBackend, StaticFactory, issuer_factory};
    use crate::tokens::RoxClaims;

    fn base_options(factory: Arc<dyn BackendFactory>) -> Vec<ProviderOption> {
        vec![
            ProviderOption::WithType("static".into()),
            ProviderOption::WithName("Static".into()),
            ProviderOption::WithEnabled(true),
            ProviderOption::DefaultNewId,
            ProviderOption::WithBackendFactory(factory),
        ]
    }

    #[tokio::test]
    async fn test_defaults_fill_unset_values() {
        let issuers = issuer_factory();
        let mut options = base_options(Arc::new(StaticFactory::default()));
        options.extend([
            ProviderOption::DefaultBackend(BackendFailurePolicy::Fail),
            ProviderOption::DefaultLoginUrl("/sso/providers/login".into()),
            ProviderOption::DefaultTokenIssuer {
                factory: issuers.clone(),
                options: vec![],
            },
        ]);
        let provider = Provider::new(options).await.unwrap();

        let id = provider.id();
        assert_eq!(id.len(), 36);
        assert!(provider.backend().is_some());
        assert_eq!(
            provider.login_url().as_deref(),
            Some(format!("/sso/providers/login/{id}").as_str())
        );
        assert!(issuers.has_source(&id));

        // Defaults leave explicitly set values alone.
        provider
            .apply_options(vec![
                ProviderOption::DefaultNewId,
                ProviderOption::DefaultLoginUrl("/other".into()),
            ])
            .await
            .unwrap();
        assert_eq!(provider.id(), id);
        assert!(provider.login_url().unwrap().starts_with("/sso/providers/login/"));
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back() {
        let issuers = issuer_factory();
        let store = Arc::new(InMemoryAuthProviderStore::new());
        let mut options = base_options(Arc::new(FailingFactory));
        options.extend([
            ProviderOption::WithId("p1".into()),
            ProviderOption::DefaultTokenIssuer {
                factory: issuers.clone(),
                options: vec![],
            },
            ProviderOption::AddToStore(store.clone()),
            ProviderOption::DefaultBackend(BackendFailurePolicy::Fail),
        ]);

        let err = Provider::new(options).await.unwrap_err();
        assert!(err.to_string().contains("creating backend for provider p1"));
        assert!(!issuers.has_source("p1"));
        assert!(store.get_auth_provider("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_update_leaves_state_unchanged() {
        let provider = Provider::new(base_options(Arc::new(FailingFactory)))
            .await
            .unwrap();
        let before = provider.storage_view();

        let err = provider
            .apply_options(vec![
                ProviderOption::WithName("Renamed".into()),
                ProviderOption::RecreateBackend,
            ])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("creating backend"));
        assert_eq!(provider.storage_view(), before);
    }

    #[tokio::test]
    async fn test_log_and_ignore_keeps_provider_without_backend() {
        let mut options = base_options(Arc::new(FailingFactory));
        options.push(ProviderOption::DefaultBackend(BackendFailurePolicy::LogAndIgnore));
        let provider = Provider::new(options).await.unwrap();
        assert!(provider.backend().is_none());
    }

    #[tokio::test]
    async fn test_update_store_restores_previous_on_failure() {
        let store = Arc::new(InMemoryAuthProviderStore::new());
        let mut options = base_options(Arc::new(FailingFactory));
        options.push(ProviderOption::WithId("p1".into()));
        options.push(ProviderOption::AddToStore(store.clone()));
        let provider = Provider::new(options).await.unwrap();

        let err = provider
            .apply_options(vec![
                ProviderOption::WithName("Renamed".into()),
                ProviderOption::UpdateStore(store.clone()),
                ProviderOption::RecreateBackend,
            ])
            .await;
        assert!(err.is_err());
        let stored = store.get_auth_provider("p1").await.unwrap().unwrap();
        assert_eq!(stored.name, "Static");
    }

    #[tokio::test]
    async fn test_source_validation() {
        let issuers = issuer_factory();
        let mut options = base_options(Arc::new(StaticFactory::default()));
        options.extend([
            ProviderOption::DefaultBackend(BackendFailurePolicy::Fail),
            ProviderOption::DefaultTokenIssuer {
                factory: issuers.clone(),
                options: vec![TokenOption::Ttl(std::time::Duration::from_secs(60))],
            },
        ]);
        let provider = Provider::new(options).await.unwrap();

        let issuer = provider.issuer().unwrap();
        let info = issuer.issue(RoxClaims::default(), &[]).unwrap();
        let validator = issuers.validator();
        assert!(validator.validate(&info.token).is_ok());

        provider
            .revocation()
            .revoke(&info.claims.jti, info.claims.expiry());
        assert!(validator.validate(&info.token).unwrap_err().is_no_credentials());

        let info = issuer.issue(RoxClaims::default(), &[]).unwrap();
        provider
            .apply_options(vec![ProviderOption::WithEnabled(false)])
            .await
            .unwrap();
        assert!(validator.validate(&info.token).unwrap_err().is_no_credentials());
    }

    #[tokio::test]
    async fn test_backend_replacement_calls_lifecycle_hooks() {
        let first = Arc::new(StaticBackend::default());
        let second = Arc::new(StaticBackend::default());
        let mut options = base_options(Arc::new(StaticFactory::default()));
        options.push(ProviderOption::WithBackend(first.clone()));
        let provider = Provider::new(options).await.unwrap();
        assert_eq!(first.enabled_count(), 1);

        provider
            .apply_options(vec![ProviderOption::WithBackend(second.clone())])
            .await
            .unwrap();
        assert_eq!(first.disabled_count(), 1);
        assert_eq!(second.enabled_count(), 1);
    }

    #[tokio::test]
    async fn test_required_attributes() {
        let mut options = base_options(Arc::new(StaticFactory::default()));
        options.push(ProviderOption::WithRequiredAttributes(vec![RequiredAttribute {
            attribute_key: "orgid".into(),
            attribute_value: "42".into(),
        }]));
        let provider = Provider::new(options).await.unwrap();

        let ok = ClaimAttributes::from([("orgid".to_string(), vec!["7".into(), "42".into()])]);
        assert!(provider.check_required_attributes(&ok).is_ok());

        let wrong = ClaimAttributes::from([("orgid".to_string(), vec!["7".into()])]);
        let err = provider.check_required_attributes(&wrong).unwrap_err();
        assert!(err.is_no_credentials());
        assert!(err.to_string().contains(r#"required attribute "orgid" did not have the required value"#));
    }
}
