//! The auth provider registry.
//!
//! Owns every [`Provider`] and every [`BackendFactory`], persists provider
//! changes through an [`AuthProviderStore`] and completes logins by turning a
//! backend's [`AuthResponse`] into a platform token.
//!
//! Both maps sit behind one lock. Provider mutations happen outside of it:
//! the registry looks a provider up, releases the lock and only then applies
//! options under the provider's own lock.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::backend::{BackendFactory, BackendFactoryCreator};
use super::cookies::RefreshTokenCookieData;
use super::provider::{BackendFailurePolicy, Provider, ProviderOption};
use super::store::AuthProviderStore;
use super::types::{AuthProviderConfig, AuthResponse, CallbackRequest, RefreshTokenData};
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult, ResultExt};
use crate::roles::{RoleMapperFactory, UserDescriptor, is_none_role};
use crate::tokens::{ExternalUserClaim, IssuerFactory, RoxClaims, TokenInfo, TokenOption};

const NO_VALID_ROLE: &str =
    "access for this user is not authorized: no valid role, please contact your system administrator";

/// URL layout of the registry's HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPaths {
    /// Prefix of callbacks, login and token exchange.
    pub url_path_prefix: String,
    /// UI location receiving login results in the URL fragment.
    pub redirect_url: String,
    /// Prefix of the session endpoints. Scopes the refresh cookie.
    pub session_path_prefix: String,
}

impl RegistryPaths {
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            url_path_prefix: config.url_path_prefix.trim_end_matches('/').to_string(),
            redirect_url: config.redirect_url.clone(),
            session_path_prefix: config.session_path_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Prefix of the login endpoint, `<prefix>/login`.
    #[must_use]
    pub fn login_prefix(&self) -> String {
        format!("{}/login", self.url_path_prefix)
    }

    /// Callback prefix handed to the factory of `provider_type`.
    #[must_use]
    pub fn callback_prefix(&self, provider_type: &str) -> String {
        format!("{}/{}/", self.url_path_prefix, provider_type)
    }
}

/// Result of a completed interactive login.
#[derive(Debug)]
pub enum LoginOutcome {
    /// A token was issued.
    Token {
        token: TokenInfo,
        refresh: Option<RefreshTokenCookieData>,
    },
    /// A test login; nothing was issued.
    Test(TestLoginUser),
}

/// What a test login reports back to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestLoginUser {
    pub user: ExternalUserClaim,
    pub roles: Vec<String>,
}

#[derive(Default)]
struct RegistryMaps {
    providers: HashMap<String, Arc<Provider>>,
    factories: HashMap<String, Arc<dyn BackendFactory>>,
}

struct RegistryInner {
    paths: RegistryPaths,
    store: Arc<dyn AuthProviderStore>,
    issuers: IssuerFactory,
    role_mappers: Arc<dyn RoleMapperFactory>,
    maps: RwLock<RegistryMaps>,
}

/// Shared handle to the provider registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    #[must_use]
    pub fn new(
        paths: RegistryPaths,
        store: Arc<dyn AuthProviderStore>,
        issuers: IssuerFactory,
        role_mappers: Arc<dyn RoleMapperFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                paths,
                store,
                issuers,
                role_mappers,
                maps: RwLock::new(RegistryMaps::default()),
            }),
        }
    }

    #[must_use]
    pub fn paths(&self) -> &RegistryPaths {
        &self.inner.paths
    }

    #[must_use]
    pub fn issuer_factory(&self) -> &IssuerFactory {
        &self.inner.issuers
    }

    fn standard_options(&self) -> Vec<ProviderOption> {
        vec![
            ProviderOption::DefaultLoginUrl(self.inner.paths.login_prefix()),
            ProviderOption::DefaultRoleMapper(self.inner.role_mappers.clone()),
            ProviderOption::DefaultTokenIssuer {
                factory: self.inner.issuers.clone(),
                options: Vec::new(),
            },
        ]
    }

    /// Loads every stored provider.
    ///
    /// Providers whose backend cannot be built yet are kept without one; they
    /// get a backend once their factory is registered.
    ///
    /// # Errors
    ///
    /// Store failures, or a provider that cannot be set up at all.
    pub async fn init(&self) -> AuthResult<()> {
        let stored = self
            .inner
            .store
            .get_all_auth_providers()
            .await
            .context("loading auth providers")?;

        for config in stored {
            let id = config.id.clone();
            if self.get_provider(&id).await.is_some() {
                continue;
            }
            let factory = self.backend_factory(&config.provider_type).await;

            let mut options = vec![ProviderOption::WithStorageView(config)];
            if let Some(factory) = factory {
                options.push(ProviderOption::WithBackendFactory(factory));
            }
            options.push(ProviderOption::DefaultBackend(BackendFailurePolicy::LogAndIgnore));
            options.extend(self.standard_options());

            let provider = Provider::new(options)
                .await
                .with_context(|| format!("loading auth provider {id}"))?;
            self.inner.maps.write().await.providers.insert(id, provider);
        }

        let count = self.inner.maps.read().await.providers.len();
        info!(providers = count, "Auth provider registry initialized");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Backend factories
    // ------------------------------------------------------------------

    /// Registers the factory for `provider_type`.
    ///
    /// Providers of that type that have no backend yet get one built in the
    /// background.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the type already has a factory.
    pub async fn register_backend_factory(
        &self,
        provider_type: &str,
        creator: BackendFactoryCreator,
    ) -> AuthResult<()> {
        let (factory, pending) = {
            let mut maps = self.inner.maps.write().await;
            if maps.factories.contains_key(provider_type) {
                return Err(AuthError::already_exists(format!(
                    "backend factory for type {provider_type:?} is already registered"
                )));
            }
            let factory = creator(&self.inner.paths.callback_prefix(provider_type));
            maps.factories
                .insert(provider_type.to_string(), factory.clone());

            let pending: Vec<_> = maps
                .providers
                .values()
                .filter(|p| p.provider_type() == provider_type && p.backend().is_none())
                .cloned()
                .collect();
            (factory, pending)
        };

        debug!(
            provider_type = %provider_type,
            pending = pending.len(),
            "Registered backend factory"
        );

        if !pending.is_empty() {
            tokio::spawn(async move {
                for provider in pending {
                    let result = provider
                        .apply_options(vec![
                            ProviderOption::WithBackendFactory(factory.clone()),
                            ProviderOption::DefaultBackend(BackendFailurePolicy::LogAndIgnore),
                        ])
                        .await;
                    if let Err(err) = result {
                        warn!(
                            provider_id = %provider.id(),
                            error = %err,
                            "Attaching backend factory to auth provider failed"
                        );
                    }
                }
            });
        }
        Ok(())
    }

    pub async fn backend_factory(&self, provider_type: &str) -> Option<Arc<dyn BackendFactory>> {
        self.inner.maps.read().await.factories.get(provider_type).cloned()
    }

    /// Registered provider types, sorted.
    pub async fn backend_factory_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.inner.maps.read().await.factories.keys().cloned().collect();
        types.sort();
        types
    }

    // ------------------------------------------------------------------
    // Provider CRUD
    // ------------------------------------------------------------------

    /// Creates, persists and registers a new provider.
    ///
    /// `extra` options run after the standard ones and before the provider
    /// is stored.
    ///
    /// # Errors
    ///
    /// - `InvalidArgs` for a missing name or type
    /// - `NotFound` if the type has no factory
    /// - `AlreadyExists` if the name is taken
    /// - the backend construction error, wrapped with the provider ID
    pub async fn create_provider(
        &self,
        config: AuthProviderConfig,
        extra: Vec<ProviderOption>,
    ) -> AuthResult<Arc<Provider>> {
        if config.name.is_empty() {
            return Err(AuthError::invalid_args("auth provider name must not be empty"));
        }
        if config.provider_type.is_empty() {
            return Err(AuthError::invalid_args("auth provider type must not be empty"));
        }
        let factory = self
            .backend_factory(&config.provider_type)
            .await
            .ok_or_else(|| {
                AuthError::not_found(format!(
                    "no backend factory for auth provider type {:?}",
                    config.provider_type
                ))
            })?;
        if self
            .inner
            .store
            .auth_provider_exists_with_name(&config.name)
            .await?
        {
            return Err(AuthError::already_exists(format!(
                "auth provider with name {:?}",
                config.name
            )));
        }

        let mut options = vec![
            ProviderOption::WithStorageView(config),
            ProviderOption::DefaultNewId,
            ProviderOption::WithBackendFactory(factory),
            ProviderOption::DefaultBackend(BackendFailurePolicy::Fail),
        ];
        options.extend(self.standard_options());
        options.push(ProviderOption::TouchLastUpdated);
        options.extend(extra);
        options.push(ProviderOption::AddToStore(self.inner.store.clone()));

        let provider = Provider::new(options).await?;
        let id = provider.id();
        self.inner
            .maps
            .write()
            .await
            .providers
            .insert(id.clone(), provider.clone());

        info!(provider_id = %id, provider_type = %provider.provider_type(), "Created auth provider");
        Ok(provider)
    }

    /// Applies `options` to a provider and persists the result.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown ID, otherwise the first option failure. The
    /// provider is left unchanged on failure.
    pub async fn update_provider(
        &self,
        id: &str,
        mut options: Vec<ProviderOption>,
    ) -> AuthResult<Arc<Provider>> {
        let provider = self.require_provider(id).await?;
        options.push(ProviderOption::TouchLastUpdated);
        options.push(ProviderOption::UpdateStore(self.inner.store.clone()));
        provider
            .apply_options(options)
            .await
            .with_context(|| format!("updating auth provider {id}"))?;
        Ok(provider)
    }

    /// Configuration of a provider with secrets masked.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown ID.
    pub async fn redacted_config(&self, id: &str) -> AuthResult<HashMap<String, String>> {
        let provider = self.require_provider(id).await?;
        let config = provider.storage_view().config;
        Ok(match provider.backend_factory() {
            Some(factory) => factory.redact_config(&config),
            None => config,
        })
    }

    /// Replaces a provider's backend configuration and rebuilds its backend.
    ///
    /// Masked secrets in `new_config` are replaced by the stored values.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown ID or a type without factory, otherwise the
    /// backend construction error. The provider is left unchanged on failure.
    pub async fn update_provider_config(
        &self,
        id: &str,
        new_config: HashMap<String, String>,
    ) -> AuthResult<Arc<Provider>> {
        let provider = self.require_provider(id).await?;
        let factory = provider.backend_factory().ok_or_else(|| {
            AuthError::not_found(format!(
                "no backend factory for auth provider type {:?}",
                provider.provider_type()
            ))
        })?;
        let merged = factory.merge_config(&new_config, &provider.storage_view().config);
        self.update_provider(
            id,
            vec![
                ProviderOption::WithConfig(merged),
                ProviderOption::RecreateBackend,
            ],
        )
        .await
    }

    /// Deletes a provider.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown ID, unless `force` is set
    /// - `InvalidArgs` if the provider is active and `ignore_active` is unset
    pub async fn delete_provider(&self, id: &str, force: bool, ignore_active: bool) -> AuthResult<()> {
        let mut maps = self.inner.maps.write().await;

        let Some(provider) = maps.providers.get(id).cloned() else {
            if force {
                return self.inner.store.remove_auth_provider(id, true).await;
            }
            return Err(AuthError::not_found(format!("auth provider {id:?}")));
        };

        if provider.active() && !ignore_active {
            return Err(AuthError::invalid_args(format!(
                "auth provider {:?} is active; deleting it requires ignoring its active state",
                provider.name()
            )));
        }

        self.inner
            .store
            .remove_auth_provider(id, force)
            .await
            .with_context(|| format!("deleting auth provider {id}"))?;
        if let Err(err) = self.inner.issuers.unregister_source(id) {
            debug!(provider_id = %id, error = %err, "Auth provider had no token source");
        }
        maps.providers.remove(id);
        drop(maps);

        if let Some(backend) = provider.backend() {
            backend.on_disable(id);
        }
        info!(provider_id = %id, "Deleted auth provider");
        Ok(())
    }

    pub async fn get_provider(&self, id: &str) -> Option<Arc<Provider>> {
        self.inner.maps.read().await.providers.get(id).cloned()
    }

    /// Providers filtered by name and type, sorted by name.
    pub async fn get_providers(
        &self,
        name: Option<&str>,
        provider_type: Option<&str>,
    ) -> Vec<Arc<Provider>> {
        let mut providers: Vec<_> = self
            .inner
            .maps
            .read()
            .await
            .providers
            .values()
            .filter(|p| name.is_none_or(|n| p.name() == n))
            .filter(|p| provider_type.is_none_or(|t| p.provider_type() == t))
            .cloned()
            .collect();
        providers.sort_by_key(|p| p.name());
        providers
    }

    async fn require_provider(&self, id: &str) -> AuthResult<Arc<Provider>> {
        self.get_provider(id)
            .await
            .ok_or_else(|| AuthError::not_found(format!("auth provider {id:?}")))
    }

    /// Looks up a provider that must be of `provider_type`.
    async fn typed_provider(&self, provider_type: &str, id: &str) -> AuthResult<Arc<Provider>> {
        self.get_provider(id)
            .await
            .filter(|p| p.provider_type() == provider_type)
            .ok_or_else(|| AuthError::invalid_args(format!("invalid auth provider ID {id:?}")))
    }

    // ------------------------------------------------------------------
    // Logins
    // ------------------------------------------------------------------

    /// Completes a login from an identity-provider callback.
    ///
    /// # Errors
    ///
    /// Any failure before a token is produced. Callers turn these into an
    /// error redirect.
    pub async fn process_callback(
        &self,
        provider_type: &str,
        provider_id: &str,
        request: &CallbackRequest,
        test_mode: bool,
    ) -> AuthResult<LoginOutcome> {
        let provider = self.typed_provider(provider_type, provider_id).await?;
        let backend = provider
            .backend()
            .ok_or_else(|| AuthError::no_credentials("auth provider backend not available"))?;
        let response = backend
            .process_http_request(request)
            .await?
            .ok_or_else(|| AuthError::no_credentials("authentication response is empty"))?;
        self.complete_login(&provider, response, test_mode).await
    }

    /// Authenticates with an externally obtained token.
    ///
    /// Returns the outcome and the client state with any test marker removed.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown type, `InvalidArgs` for a state naming an
    /// unknown provider, otherwise the backend or token issuance failure.
    pub async fn exchange_token(
        &self,
        external_token: &str,
        provider_type: &str,
        state: &str,
    ) -> AuthResult<(LoginOutcome, String)> {
        let factory = self.backend_factory(provider_type).await.ok_or_else(|| {
            AuthError::not_found(format!("no backend factory for type {provider_type:?}"))
        })?;
        let (provider_id, client_state) = factory.resolve_provider_and_client_state(state)?;
        let provider = self.typed_provider(provider_type, &provider_id).await?;
        let backend = provider
            .backend()
            .ok_or_else(|| AuthError::no_credentials("auth provider backend not available"))?;

        let (response, client_state) = backend
            .exchange_token(external_token, &client_state)
            .await?;
        let (client_state, test_mode) = super::state::parse_client_state(&client_state);
        let outcome = self.complete_login(&provider, response, test_mode).await?;
        Ok((outcome, client_state.to_string()))
    }

    /// Re-issues an access token from a refresh-token cookie.
    ///
    /// # Errors
    ///
    /// `InvalidArgs` for an unknown provider, otherwise the backend's refresh
    /// failure or a token issuance failure.
    pub async fn refresh_token(&self, cookie: &RefreshTokenCookieData) -> AuthResult<LoginOutcome> {
        let provider = self
            .typed_provider(&cookie.provider_type, &cookie.provider_id)
            .await?;
        let backend = provider
            .backend()
            .ok_or_else(|| AuthError::no_credentials("auth provider backend not available"))?;
        let mut response = backend
            .refresh_access_token(&RefreshTokenData {
                refresh_token: cookie.refresh_token.clone(),
                refresh_token_type: cookie.refresh_token_type.clone(),
            })
            .await?;
        if response.refresh_token_data.is_none() {
            response.refresh_token_data = Some(RefreshTokenData {
                refresh_token: cookie.refresh_token.clone(),
                refresh_token_type: cookie.refresh_token_type.clone(),
            });
        }
        self.complete_login(&provider, response, false).await
    }

    /// Revokes a token previously issued by one of the providers.
    ///
    /// # Errors
    ///
    /// `NoCredentials` if the token does not validate.
    pub async fn revoke_token(&self, token: &str) -> AuthResult<()> {
        let info = self.inner.issuers.validator().validate(token)?;
        for source_id in &info.claims.aud {
            if let Some(provider) = self.get_provider(source_id).await {
                provider
                    .revocation()
                    .revoke(&info.claims.jti, info.claims.expiry());
                debug!(provider_id = %source_id, "Revoked access token");
            }
        }
        Ok(())
    }

    async fn complete_login(
        &self,
        provider: &Arc<Provider>,
        response: AuthResponse,
        test_mode: bool,
    ) -> AuthResult<LoginOutcome> {
        provider.check_required_attributes(&response.claims.attributes)?;
        let roles = self.resolve_role_names(provider, &response.claims).await?;

        if test_mode {
            return Ok(LoginOutcome::Test(TestLoginUser {
                user: response.claims,
                roles,
            }));
        }
        if roles.is_empty() {
            return Err(AuthError::no_credentials(NO_VALID_ROLE));
        }

        let token = self.issue_token_for_response(provider, &response, roles)?;
        let refresh = response
            .refresh_token_data
            .map(|data| RefreshTokenCookieData {
                provider_type: provider.provider_type(),
                provider_id: provider.id(),
                refresh_token: data.refresh_token,
                refresh_token_type: data.refresh_token_type,
            });

        if !provider.active() {
            self.mark_active(provider).await;
        }
        Ok(LoginOutcome::Token { token, refresh })
    }

    async fn resolve_role_names(
        &self,
        provider: &Provider,
        user: &ExternalUserClaim,
    ) -> AuthResult<Vec<String>> {
        let mapper = provider
            .role_mapper()
            .ok_or_else(|| AuthError::no_credentials(NO_VALID_ROLE))?;
        let descriptor = UserDescriptor {
            user_id: user.user_id.clone(),
            attributes: user.attributes.clone(),
        };
        let roles = mapper.from_user_descriptor(&descriptor).await.map_err(|err| {
            debug!(provider_id = %provider.id(), error = %err, "Role mapping failed");
            AuthError::no_credentials(NO_VALID_ROLE)
        })?;
        Ok(roles
            .into_iter()
            .map(|r| r.name)
            .filter(|name| !is_none_role(name))
            .collect())
    }

    fn issue_token_for_response(
        &self,
        provider: &Provider,
        response: &AuthResponse,
        roles: Vec<String>,
    ) -> AuthResult<TokenInfo> {
        let issuer = provider.issuer().ok_or_else(|| {
            AuthError::invariant_violation(format!(
                "auth provider {} has no token issuer",
                provider.id()
            ))
        })?;
        issuer.issue(
            RoxClaims {
                role_names: roles,
                external_user: Some(response.claims.clone()),
                name: String::new(),
            },
            &[TokenOption::Expiry(response.expiration)],
        )
    }

    async fn mark_active(&self, provider: &Arc<Provider>) {
        let result = provider
            .apply_options(vec![
                ProviderOption::WithActive(true),
                ProviderOption::UpdateStore(self.inner.store.clone()),
            ])
            .await;
        match result {
            Ok(()) => info!(provider_id = %provider.id(), "Auth provider is now active"),
            Err(err) => warn!(
                provider_id = %provider.id(),
                error = %err,
                "Could not mark auth provider as active"
            ),
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("paths", &self.inner.paths)
            .finish_non_exhaustive()
    }
}
