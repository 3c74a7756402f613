//! Axum routes for provider logins, sessions and M2M exchange.
//!
//! ```ignore
//! let app = Router::new()
//!     .merge(provider_routes(registry.clone()))
//!     .merge(session_routes(registry))
//!     .merge(m2m_routes(exchangers));
//! ```

pub mod error;
pub mod m2m;
pub mod providers;
pub mod session;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::authproviders::Registry;
use crate::m2m::TokenExchangerSet;

pub use m2m::{M2M_EXCHANGE_PATH, M2mExchangeRequest, M2mExchangeResponse, m2m_exchange_handler};
pub use providers::{
    ExchangeTokenRequest, ExchangeTokenResponse, callback_handler, exchange_token_handler,
    login_handler,
};
pub use session::{TokenRefreshResponse, logout_handler, token_refresh_handler};

/// Login, callback and external token exchange under the registry prefix.
pub fn provider_routes(registry: Registry) -> Router {
    let prefix = registry.paths().url_path_prefix.clone();
    Router::new()
        .route(
            &format!("{prefix}/login/{{provider_id}}"),
            get(login_handler),
        )
        .route(&format!("{prefix}/exchangetoken"), post(exchange_token_handler))
        .route(
            &format!("{prefix}/{{provider_type}}/{{*rest}}"),
            get(callback_handler).post(callback_handler),
        )
        .with_state(registry)
}

/// Token refresh and logout under the session prefix.
pub fn session_routes(registry: Registry) -> Router {
    let prefix = registry.paths().session_path_prefix.clone();
    Router::new()
        .route(&format!("{prefix}/tokenrefresh"), post(token_refresh_handler))
        .route(&format!("{prefix}/logout"), post(logout_handler))
        .with_state(registry)
}

pub fn m2m_routes(exchangers: Arc<TokenExchangerSet>) -> Router {
    Router::new()
        .route(M2M_EXCHANGE_PATH, post(m2m_exchange_handler))
        .with_state(exchangers)
}

/// All auth routes.
pub fn auth_routes(registry: Registry, exchangers: Arc<TokenExchangerSet>) -> Router {
    Router::new()
        .merge(provider_routes(registry.clone()))
        .merge(session_routes(registry))
        .merge(m2m_routes(exchangers))
}
