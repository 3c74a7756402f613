//! Backends and factories with canned behavior for unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use super::backend::{Backend, BackendFactory};
use super::types::{AuthResponse, CallbackRequest, RefreshTokenData, RequestInfo};
use crate::error::{AuthError, AuthResult};
use crate::tokens::{ExternalUserClaim, IssuerFactory, SigningKeyPair, TokenOption, TokenSigner};

pub(crate) fn issuer_factory() -> IssuerFactory {
    let signer = TokenSigner::new(SigningKeyPair::generate_ec().unwrap(), "https://rox/jwt");
    IssuerFactory::new(
        signer,
        vec![
            TokenOption::DefaultTtl(Duration::from_secs(3600)),
            TokenOption::Ttl(Duration::from_secs(86400)),
        ],
    )
}

pub(crate) fn auth_response(user_id: &str, attributes: &[(&str, &str)]) -> AuthResponse {
    let mut attrs: HashMap<String, Vec<String>> = HashMap::new();
    for (k, v) in attributes {
        attrs.entry((*k).to_string()).or_default().push((*v).to_string());
    }
    AuthResponse {
        claims: ExternalUserClaim {
            user_id: user_id.to_string(),
            full_name: format!("User {user_id}"),
            email: format!("{user_id}@example.com"),
            attributes: attrs,
        },
        expiration: OffsetDateTime::now_utc() + time::Duration::hours(1),
        refresh_token_data: Some(RefreshTokenData {
            refresh_token: "refresh+token/value".into(),
            refresh_token_type: "refresh_token".into(),
        }),
    }
}

/// Returns the same response for every callback and exchange.
#[derive(Default)]
pub(crate) struct StaticBackend {
    config: HashMap<String, String>,
    response: Option<AuthResponse>,
    enabled: AtomicUsize,
    disabled: AtomicUsize,
}

impl StaticBackend {
    pub(crate) fn new(response: Option<AuthResponse>) -> Self {
        Self {
            response,
            ..Self::default()
        }
    }

    pub(crate) fn enabled_count(&self) -> usize {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn disabled_count(&self) -> usize {
        self.disabled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for StaticBackend {
    fn config(&self) -> HashMap<String, String> {
        let mut config = self.config.clone();
        config.insert("mode".to_string(), "static".to_string());
        config
    }

    fn login_url(&self, client_state: &str, request: &RequestInfo) -> AuthResult<Option<String>> {
        Ok(Some(format!(
            "https://idp.example.com/authorize?host={}&state={client_state}",
            request.hostname
        )))
    }

    fn on_enable(&self, _provider_id: &str) {
        self.enabled.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disable(&self, _provider_id: &str) {
        self.disabled.fetch_add(1, Ordering::SeqCst);
    }

    async fn process_http_request(
        &self,
        _request: &CallbackRequest,
    ) -> AuthResult<Option<AuthResponse>> {
        Ok(self.response.clone())
    }

    async fn exchange_token(
        &self,
        _external_token: &str,
        state: &str,
    ) -> AuthResult<(AuthResponse, String)> {
        let response = self
            .response
            .clone()
            .ok_or_else(|| AuthError::no_credentials("no response configured"))?;
        Ok((response, state.to_string()))
    }

    async fn refresh_access_token(&self, _refresh: &RefreshTokenData) -> AuthResult<AuthResponse> {
        self.response
            .clone()
            .ok_or_else(|| AuthError::no_credentials("no response configured"))
    }
}

/// Builds [`StaticBackend`]s and reads the provider from the `state` parameter.
#[derive(Default)]
pub(crate) struct StaticFactory {
    pub response: Option<AuthResponse>,
}

#[async_trait]
impl BackendFactory for StaticFactory {
    async fn create_backend(
        &self,
        _provider_id: &str,
        _ui_endpoints: &[String],
        config: &HashMap<String, String>,
        _claim_mappings: &HashMap<String, String>,
    ) -> AuthResult<Arc<dyn Backend>> {
        Ok(Arc::new(StaticBackend {
            config: config.clone(),
            ..StaticBackend::new(self.response.clone())
        }))
    }

    fn process_http_request(&self, request: &CallbackRequest) -> AuthResult<(String, String)> {
        let state = request
            .param("state")
            .ok_or_else(|| AuthError::invalid_args("no state parameter"))?;
        self.resolve_provider_and_client_state(state)
    }

    fn redact_config(&self, config: &HashMap<String, String>) -> HashMap<String, String> {
        let mut redacted = config.clone();
        if redacted.contains_key("secret") {
            redacted.insert("secret".into(), "*****".into());
        }
        redacted
    }

    fn merge_config(
        &self,
        new_config: &HashMap<String, String>,
        stored_config: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut merged = new_config.clone();
        if merged.get("secret").map(String::as_str) == Some("*****") {
            if let Some(secret) = stored_config.get("secret") {
                merged.insert("secret".into(), secret.clone());
            }
        }
        merged
    }
}

/// Fails every backend construction.
pub(crate) struct FailingFactory;

#[async_trait]
impl BackendFactory for FailingFactory {
    async fn create_backend(
        &self,
        _provider_id: &str,
        _ui_endpoints: &[String],
        _config: &HashMap<String, String>,
        _claim_mappings: &HashMap<String, String>,
    ) -> AuthResult<Arc<dyn Backend>> {
        Err(AuthError::internal("identity provider unreachable"))
    }

    fn process_http_request(&self, _request: &CallbackRequest) -> AuthResult<(String, String)> {
        Err(AuthError::invalid_args("no state parameter"))
    }
}
