//! M2M token exchange endpoint.

use std::sync::Arc;

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::m2m::TokenExchangerSet;

/// Path of the exchange endpoint.
pub const M2M_EXCHANGE_PATH: &str = "/v1/auth/m2m/exchange";

#[derive(Debug, Deserialize)]
pub struct M2mExchangeRequest {
    pub id_token: String,
}

#[derive(Debug, Serialize)]
pub struct M2mExchangeResponse {
    pub access_token: String,
}

/// `POST /v1/auth/m2m/exchange`: trades an external ID token for a platform token.
pub async fn m2m_exchange_handler(
    State(exchangers): State<Arc<TokenExchangerSet>>,
    Json(request): Json<M2mExchangeRequest>,
) -> Result<Json<M2mExchangeResponse>, AuthError> {
    if request.id_token.is_empty() {
        return Err(AuthError::invalid_args("id_token must not be empty"));
    }
    let access_token = exchangers.exchange(&request.id_token).await?;
    Ok(Json(M2mExchangeResponse { access_token }))
}
