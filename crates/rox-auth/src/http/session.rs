//! Session endpoints: access-token refresh and logout.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use crate::authproviders::cookies::{
    access_token_cookie, refresh_token_cookie, removal_cookie,
};
use crate::authproviders::{
    ACCESS_TOKEN_COOKIE, LoginOutcome, REFRESH_TOKEN_COOKIE, RefreshTokenCookieData, Registry,
};
use crate::error::AuthError;

#[derive(Debug, Serialize)]
pub struct TokenRefreshResponse {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
}

/// `POST <session>/tokenrefresh`: re-issues the access token from the refresh cookie.
pub async fn token_refresh_handler(
    State(registry): State<Registry>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<TokenRefreshResponse>), AuthError> {
    let cookie = jar
        .get(REFRESH_TOKEN_COOKIE)
        .ok_or_else(|| AuthError::no_credentials("no refresh token cookie"))?;
    let data = RefreshTokenCookieData::decode(cookie.value())?;

    let LoginOutcome::Token { token, refresh } = registry.refresh_token(&data).await? else {
        return Err(AuthError::invariant_violation(
            "token refresh produced a test login",
        ));
    };

    let expiry = token.expiry();
    let mut jar = jar.add(access_token_cookie(&token.token, expiry));
    if let Some(refresh) = refresh {
        jar = jar.add(refresh_token_cookie(
            &refresh,
            &registry.paths().session_path_prefix,
        ));
    }
    Ok((
        jar,
        Json(TokenRefreshResponse {
            token: token.token,
            expiry,
        }),
    ))
}

/// `POST <session>/logout`: revokes the presented access token and clears
/// the session cookies.
///
/// Always succeeds so that cookies are cleared even for stale sessions.
pub async fn logout_handler(
    State(registry): State<Registry>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let token = bearer_token(&headers)
        .or_else(|| jar.get(ACCESS_TOKEN_COOKIE).map(|c| c.value().to_string()));
    match token {
        Some(token) => {
            if let Err(err) = registry.revoke_token(&token).await {
                debug!(error = %err, "Logout with a token that does not validate");
            }
        }
        None => debug!("No access token found during logout - clearing cookies only"),
    }

    let jar = jar
        .add(removal_cookie(ACCESS_TOKEN_COOKIE, "/"))
        .add(removal_cookie(
            REFRESH_TOKEN_COOKIE,
            &registry.paths().session_path_prefix,
        ));
    (StatusCode::NO_CONTENT, jar, ()).into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
