//! Session cookies set after a successful login.

use axum_extra::extract::cookie::{Cookie, SameSite};
use time::{Duration, OffsetDateTime};

use crate::error::{AuthError, AuthResult};

/// Cookie carrying the platform access token.
pub const ACCESS_TOKEN_COOKIE: &str = "RoxAccessToken";

/// Cookie carrying the identity provider's refresh token.
pub const REFRESH_TOKEN_COOKIE: &str = "RoxRefreshToken";

/// Builds the access-token cookie, expiring together with the token.
#[must_use]
pub fn access_token_cookie(token: &str, expiry: OffsetDateTime) -> Cookie<'static> {
    let max_age = (expiry - OffsetDateTime::now_utc()).max(Duration::ZERO);
    Cookie::build((ACCESS_TOKEN_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(Duration::seconds(max_age.whole_seconds()))
        .build()
}

/// Payload of the refresh-token cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenCookieData {
    pub provider_type: String,
    pub provider_id: String,
    pub refresh_token: String,
    pub refresh_token_type: String,
}

impl RefreshTokenCookieData {
    /// Form-encodes the payload.
    #[must_use]
    pub fn encode(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("providerType", &self.provider_type)
            .append_pair("providerId", &self.provider_id)
            .append_pair("refreshToken", &self.refresh_token)
            .append_pair("refreshTokenType", &self.refresh_token_type)
            .finish()
    }

    /// Parses a payload produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgs` when the provider ID or refresh token is missing.
    pub fn decode(value: &str) -> AuthResult<Self> {
        let mut data = Self {
            provider_type: String::new(),
            provider_id: String::new(),
            refresh_token: String::new(),
            refresh_token_type: String::new(),
        };
        for (key, val) in url::form_urlencoded::parse(value.as_bytes()) {
            match key.as_ref() {
                "providerType" => data.provider_type = val.into_owned(),
                "providerId" => data.provider_id = val.into_owned(),
                "refreshToken" => data.refresh_token = val.into_owned(),
                "refreshTokenType" => data.refresh_token_type = val.into_owned(),
                _ => {}
            }
        }
        if data.provider_id.is_empty() || data.refresh_token.is_empty() {
            return Err(AuthError::invalid_args("malformed refresh token cookie"));
        }
        Ok(data)
    }
}

/// Builds the refresh-token cookie, scoped to the session endpoints.
#[must_use]
pub fn refresh_token_cookie(data: &RefreshTokenCookieData, session_path: &str) -> Cookie<'static> {
    Cookie::build((REFRESH_TOKEN_COOKIE, data.encode()))
        .path(session_path.to_string())
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .build()
}

/// A cookie that clears `name` at `path`.
#[must_use]
pub fn removal_cookie(name: &'static str, path: &str) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path(path.to_string())
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(Duration::seconds(-1))
        .build()
}
