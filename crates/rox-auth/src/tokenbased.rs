//! Backend for providers that only act as token sources.
//!
//! M2M exchangers register such a provider so tokens they issue validate
//! through the usual source table. There is no interactive login.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::authproviders::{
    AuthResponse, Backend, BackendFactory, BackendFactoryCreator, CallbackRequest, RequestInfo,
};
use crate::error::{AuthError, AuthResult};

/// Provider type handled by this backend.
pub const TYPE_NAME: &str = "tokenbased";

fn unsupported(what: &str) -> AuthError {
    AuthError::invalid_args(format!("{what} is not supported for token-based auth providers"))
}

/// A backend with no login flow.
#[derive(Debug, Default)]
pub struct TokenBasedBackend {
    config: HashMap<String, String>,
}

#[async_trait]
impl Backend for TokenBasedBackend {
    fn config(&self) -> HashMap<String, String> {
        self.config.clone()
    }

    fn login_url(&self, _client_state: &str, _request: &RequestInfo) -> AuthResult<Option<String>> {
        Err(unsupported("login"))
    }

    async fn process_http_request(
        &self,
        _request: &CallbackRequest,
    ) -> AuthResult<Option<AuthResponse>> {
        Err(unsupported("callback processing"))
    }

    async fn exchange_token(
        &self,
        _external_token: &str,
        _state: &str,
    ) -> AuthResult<(AuthResponse, String)> {
        Err(unsupported("token exchange"))
    }
}

#[derive(Debug, Default)]
pub struct TokenBasedFactory;

impl TokenBasedFactory {
    #[must_use]
    pub fn creator() -> BackendFactoryCreator {
        Arc::new(|_callback_prefix: &str| Arc::new(Self) as Arc<dyn BackendFactory>)
    }
}

#[async_trait]
impl BackendFactory for TokenBasedFactory {
    async fn create_backend(
        &self,
        _provider_id: &str,
        _ui_endpoints: &[String],
        config: &HashMap<String, String>,
        _claim_mappings: &HashMap<String, String>,
    ) -> AuthResult<Arc<dyn Backend>> {
        Ok(Arc::new(TokenBasedBackend {
            config: config.clone(),
        }))
    }

    fn process_http_request(&self, _request: &CallbackRequest) -> AuthResult<(String, String)> {
        Err(unsupported("callback processing"))
    }
}
