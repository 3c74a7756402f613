//! Protocol backends and the factories that build them.
//!
//! A [`BackendFactory`] exists once per provider type (e.g. `oidc`) and owns
//! the type's callback route. A [`Backend`] is one configured instance of
//! that protocol, bound to a single provider.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::types::{AuthResponse, CallbackRequest, RefreshTokenData, RequestInfo};
use crate::error::{AuthError, AuthResult};
use crate::tokens::Claims;

/// A configured protocol instance for one provider.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Effective configuration after defaults and negotiation were applied.
    fn config(&self) -> HashMap<String, String>;

    /// URL the user agent is sent to in order to start a login.
    ///
    /// Returns `None` for backends without an interactive login.
    fn login_url(&self, client_state: &str, request: &RequestInfo) -> AuthResult<Option<String>>;

    /// URL of the identity provider's refresh endpoint, if any.
    fn refresh_url(&self) -> Option<String> {
        None
    }

    /// Called when the owning provider starts serving this backend.
    fn on_enable(&self, _provider_id: &str) {}

    /// Called when the owning provider stops serving this backend.
    fn on_disable(&self, _provider_id: &str) {}

    /// Completes a login from an identity-provider callback.
    ///
    /// `Ok(None)` means the callback carried no authentication result.
    async fn process_http_request(
        &self,
        request: &CallbackRequest,
    ) -> AuthResult<Option<AuthResponse>>;

    /// Authenticates with an externally obtained raw token.
    ///
    /// Returns the authentication result and the client state.
    async fn exchange_token(
        &self,
        external_token: &str,
        state: &str,
    ) -> AuthResult<(AuthResponse, String)>;

    /// Backend-specific check run on every token this provider issued.
    fn validate(&self, _claims: &Claims) -> AuthResult<()> {
        Ok(())
    }

    /// Obtains a fresh authentication result using a refresh token.
    async fn refresh_access_token(&self, _refresh: &RefreshTokenData) -> AuthResult<AuthResponse> {
        Err(AuthError::invalid_args(
            "refreshing access tokens is not supported by this provider",
        ))
    }
}

/// Builds backends of one provider type and demultiplexes its callbacks.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Creates a backend for the given provider.
    async fn create_backend(
        &self,
        provider_id: &str,
        ui_endpoints: &[String],
        config: &HashMap<String, String>,
        claim_mappings: &HashMap<String, String>,
    ) -> AuthResult<Arc<dyn Backend>>;

    /// Extracts `(provider ID, client state)` from a callback.
    fn process_http_request(&self, request: &CallbackRequest) -> AuthResult<(String, String)>;

    /// Extracts `(provider ID, client state)` from a raw state value.
    fn resolve_provider_and_client_state(&self, state: &str) -> AuthResult<(String, String)> {
        let (provider_id, client_state) = super::state::split_state(state);
        if provider_id.is_empty() {
            return Err(AuthError::invalid_args("state does not name a provider"));
        }
        Ok((provider_id.to_string(), client_state.to_string()))
    }

    /// Masks secrets in a configuration before it is shown.
    fn redact_config(&self, config: &HashMap<String, String>) -> HashMap<String, String> {
        config.clone()
    }

    /// Reinstates secrets the caller sent back in masked form.
    fn merge_config(
        &self,
        new_config: &HashMap<String, String>,
        _stored_config: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        new_config.clone()
    }

    /// Attribute names this provider type usually yields.
    fn suggested_attributes(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Builds a factory given its callback URL path prefix.
pub type BackendFactoryCreator = Arc<dyn Fn(&str) -> Arc<dyn BackendFactory> + Send + Sync>;
