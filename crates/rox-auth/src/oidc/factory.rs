//! Factory for OIDC backends and its configuration keys.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::backend::{
    EMAIL_ATTRIBUTE, GROUPS_ATTRIBUTE, NAME_ATTRIBUTE, OidcBackend, OidcBackendParams,
    USERID_ATTRIBUTE,
};
use super::client::{ClientCredentials, HttpOidcConnector, OidcConnector};
use super::discovery::IssuerUrl;
use super::negotiate::{ConfiguredMode, ResponseMode, negotiate};
use super::nonce::NoncePool;
use crate::authproviders::{Backend, BackendFactory, BackendFactoryCreator, CallbackRequest};
use crate::config::OidcSettings;
use crate::error::{AuthError, AuthResult, ResultExt};

/// Provider type handled by this factory.
pub const TYPE_NAME: &str = "oidc";

pub const CLIENT_ID_CONFIG_KEY: &str = "client_id";
pub const CLIENT_SECRET_CONFIG_KEY: &str = "client_secret";
pub const DONT_USE_CLIENT_SECRET_CONFIG_KEY: &str = "do_not_use_client_secret";
pub const ISSUER_CONFIG_KEY: &str = "issuer";
pub const MODE_CONFIG_KEY: &str = "mode";
pub const DISABLE_OFFLINE_ACCESS_SCOPE_CONFIG_KEY: &str = "disable_offline_access_scope";

/// Placeholder shown instead of the client secret.
pub const REDACTED_SECRET: &str = "*****";

/// UI route that receives fragment-mode responses and posts them back
/// through the token exchange endpoint.
pub const FRAGMENT_CALLBACK_PATH: &str = "/auth/response/oidc";

const CALLBACK_SUFFIX: &str = "callback";
const OFFLINE_ACCESS_SCOPE: &str = "offline_access";
const BASE_SCOPES: [&str; 3] = ["openid", "profile", "email"];

/// Builds OIDC backends. One instance serves every OIDC provider.
pub struct OidcBackendFactory {
    callback_path: String,
    connector: Arc<dyn OidcConnector>,
    settings: OidcSettings,
    nonces: Arc<NoncePool>,
}

impl OidcBackendFactory {
    /// `callback_prefix` is the registry's `<prefix>/oidc/` path.
    #[must_use]
    pub fn new(callback_prefix: &str, connector: Arc<dyn OidcConnector>, settings: OidcSettings) -> Self {
        Self {
            callback_path: format!("{callback_prefix}{CALLBACK_SUFFIX}"),
            nonces: Arc::new(NoncePool::new(settings.nonce_ttl)),
            connector,
            settings,
        }
    }

    /// Creator for [`crate::authproviders::Registry::register_backend_factory`]
    /// that talks HTTP to real providers.
    #[must_use]
    pub fn creator(settings: OidcSettings) -> BackendFactoryCreator {
        let connector: Arc<dyn OidcConnector> = Arc::new(HttpOidcConnector::new(settings.clone()));
        Self::creator_with_connector(connector, settings)
    }

    #[must_use]
    pub fn creator_with_connector(
        connector: Arc<dyn OidcConnector>,
        settings: OidcSettings,
    ) -> BackendFactoryCreator {
        Arc::new(move |callback_prefix: &str| {
            Arc::new(Self::new(callback_prefix, Arc::clone(&connector), settings.clone()))
                as Arc<dyn BackendFactory>
        })
    }

    /// Path the identity provider redirects back to.
    #[must_use]
    pub fn callback_path(&self) -> &str {
        &self.callback_path
    }
}

fn config_value<'a>(config: &'a HashMap<String, String>, key: &str) -> &'a str {
    config.get(key).map_or("", |v| v.trim())
}

fn is_true(config: &HashMap<String, String>, key: &str) -> bool {
    config_value(config, key).eq_ignore_ascii_case("true")
}

#[async_trait]
impl BackendFactory for OidcBackendFactory {
    async fn create_backend(
        &self,
        provider_id: &str,
        ui_endpoints: &[String],
        config: &HashMap<String, String>,
        claim_mappings: &HashMap<String, String>,
    ) -> AuthResult<Arc<dyn Backend>> {
        let client_id = config_value(config, CLIENT_ID_CONFIG_KEY);
        if client_id.is_empty() {
            return Err(AuthError::invalid_args("no client ID provided"));
        }

        let raw_issuer = config_value(config, ISSUER_CONFIG_KEY);
        if raw_issuer.is_empty() {
            return Err(AuthError::invalid_args("no issuer provided"));
        }
        let issuer = IssuerUrl::parse(raw_issuer, self.settings.allow_http)?;

        let configured_mode = ConfiguredMode::parse(config_value(config, MODE_CONFIG_KEY))?;
        let client_secret = Some(config_value(config, CLIENT_SECRET_CONFIG_KEY))
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        if configured_mode == ConfiguredMode::Fixed(ResponseMode::Query) && client_secret.is_none() {
            return Err(AuthError::invalid_args(
                "query response mode can only be used with a client secret",
            ));
        }
        if client_secret.is_none() && !is_true(config, DONT_USE_CLIENT_SECRET_CONFIG_KEY) {
            return Err(AuthError::invalid_args(
                "please specify a client secret, or explicitly opt out of using one",
            ));
        }

        let credentials = ClientCredentials {
            client_id: client_id.to_string(),
            client_secret,
        };
        let client = self
            .connector
            .connect(&issuer, &credentials)
            .await
            .with_context(|| format!("connecting to issuer {}", issuer.as_str()))?;

        let has_secret = credentials.client_secret.is_some();
        let (mode, response_type) = negotiate(configured_mode, client.metadata(), has_secret)?;

        let mut scopes: Vec<String> = BASE_SCOPES.iter().map(ToString::to_string).collect();
        if client.metadata().supports_scope(OFFLINE_ACCESS_SCOPE)
            && !is_true(config, DISABLE_OFFLINE_ACCESS_SCOPE_CONFIG_KEY)
        {
            scopes.push(OFFLINE_ACCESS_SCOPE.to_string());
        }

        let mut effective = config.clone();
        effective.insert(ISSUER_CONFIG_KEY.to_string(), issuer.config_value());
        effective.insert(MODE_CONFIG_KEY.to_string(), mode.config_value().to_string());

        tracing::info!(
            provider_id,
            issuer = %issuer.as_str(),
            response_mode = %mode,
            response_type = %response_type,
            "Created OIDC backend"
        );

        Ok(Arc::new(OidcBackend::new(OidcBackendParams {
            provider_id: provider_id.to_string(),
            client,
            client_id: credentials.client_id,
            mode,
            response_type,
            scopes,
            callback_path: self.callback_path.clone(),
            fragment_callback_path: FRAGMENT_CALLBACK_PATH.to_string(),
            allowed_hosts: ui_endpoints.to_vec(),
            config: effective,
            claim_mappings: claim_mappings.clone(),
            nonces: Arc::clone(&self.nonces),
            default_access_token_ttl: self.settings.default_access_token_ttl,
        })))
    }

    fn process_http_request(&self, request: &CallbackRequest) -> AuthResult<(String, String)> {
        if request.path.trim_end_matches('/') != self.callback_path {
            return Err(AuthError::not_found(format!(
                "no OIDC handler for path {:?}",
                request.path
            )));
        }
        let state = request
            .param("state")
            .ok_or_else(|| AuthError::invalid_args("no state parameter in callback"))?;
        self.resolve_provider_and_client_state(state)
    }

    fn redact_config(&self, config: &HashMap<String, String>) -> HashMap<String, String> {
        let mut redacted = config.clone();
        if let Some(secret) = redacted.get_mut(CLIENT_SECRET_CONFIG_KEY)
            && !secret.is_empty()
        {
            *secret = REDACTED_SECRET.to_string();
        }
        redacted
    }

    fn merge_config(
        &self,
        new_config: &HashMap<String, String>,
        stored_config: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut merged = new_config.clone();
        if is_true(new_config, DONT_USE_CLIENT_SECRET_CONFIG_KEY) {
            return merged;
        }
        let submitted = config_value(new_config, CLIENT_SECRET_CONFIG_KEY);
        if (submitted.is_empty() || submitted == REDACTED_SECRET)
            && let Some(stored) = stored_config
                .get(CLIENT_SECRET_CONFIG_KEY)
                .filter(|s| !s.is_empty())
        {
            merged.insert(CLIENT_SECRET_CONFIG_KEY.to_string(), stored.clone());
        }
        merged
    }

    fn suggested_attributes(&self) -> Vec<String> {
        [USERID_ATTRIBUTE, NAME_ATTRIBUTE, EMAIL_ATTRIBUTE, GROUPS_ATTRIBUTE]
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}
