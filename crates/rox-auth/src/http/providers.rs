//! Login, callback and token exchange endpoints.
//!
//! Browser-facing failures never surface as raw error statuses: once the
//! provider type is known, every outcome is a redirect to the UI with the
//! result in the URL fragment.

use std::collections::HashMap;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::authproviders::cookies::refresh_token_cookie;
use crate::authproviders::state::parse_client_state;
use crate::authproviders::types::hostname_from_headers;
use crate::authproviders::{CallbackRequest, LoginOutcome, Registry, RequestInfo};
use crate::error::AuthError;

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    #[serde(default)]
    pub state: String,
}

/// `GET <prefix>/login/{provider_id}`: redirects to the backend's login URL.
pub async fn login_handler(
    State(registry): State<Registry>,
    Path(provider_id): Path<String>,
    Query(params): Query<LoginParams>,
    headers: HeaderMap,
) -> Response {
    let Some(provider) = registry.get_provider(&provider_id).await else {
        return (
            StatusCode::NOT_FOUND,
            format!("auth provider {provider_id:?} not found"),
        )
            .into_response();
    };
    let Some(backend) = provider.backend() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "could not get login URL: auth provider backend not available",
        )
            .into_response();
    };

    let request = RequestInfo {
        hostname: hostname_from_headers(&headers),
    };
    match backend.login_url(&params.state, &request) {
        Ok(Some(url)) if !url.is_empty() => Redirect::to(&url).into_response(),
        Ok(_) => (StatusCode::INTERNAL_SERVER_ERROR, "empty login URL").into_response(),
        Err(err) => {
            warn!(provider_id = %provider_id, error = %err, "Could not build login URL");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("could not get login URL: {err}"),
            )
                .into_response()
        }
    }
}

/// `GET|POST <prefix>/{provider_type}/{*rest}`: identity-provider callbacks.
pub async fn callback_handler(
    State(registry): State<Registry>,
    Path((provider_type, _rest)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    let Some(factory) = registry.backend_factory(&provider_type).await else {
        return (
            StatusCode::NOT_FOUND,
            format!("no auth provider type {provider_type:?}"),
        )
            .into_response();
    };

    let request = CallbackRequest {
        query: parse_pairs(uri.query().unwrap_or_default().as_bytes()),
        form: if is_form(&headers) {
            parse_pairs(&body)
        } else {
            HashMap::new()
        },
        method,
        path: uri.path().to_string(),
        headers,
    };

    let (provider_id, client_state) = match factory.process_http_request(&request) {
        Ok(parsed) => parsed,
        Err(err) => return error_redirect(&registry, &provider_type, "", &err),
    };
    let (client_state, test_mode) = parse_client_state(&client_state);

    match registry
        .process_callback(&provider_type, &provider_id, &request, test_mode)
        .await
    {
        Ok(LoginOutcome::Token { token, refresh }) => {
            let jar = match refresh {
                Some(data) => {
                    jar.add(refresh_token_cookie(&data, &registry.paths().session_path_prefix))
                }
                None => jar,
            };
            let url = fragment_url(
                &registry.paths().redirect_url,
                &[
                    ("token", token.token.as_str()),
                    ("type", provider_type.as_str()),
                    ("state", client_state),
                ],
            );
            (jar, Redirect::to(&url)).into_response()
        }
        Ok(LoginOutcome::Test(user)) => {
            let user = serde_json::to_string(&user).unwrap_or_default();
            let url = fragment_url(
                &registry.paths().redirect_url,
                &[
                    ("test", "true"),
                    ("type", provider_type.as_str()),
                    ("state", client_state),
                    ("user", user.as_str()),
                ],
            );
            Redirect::to(&url).into_response()
        }
        Err(err) => error_redirect(&registry, &provider_type, client_state, &err),
    }
}

#[derive(Debug, Deserialize)]
pub struct ExchangeTokenRequest {
    pub external_token: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Serialize)]
pub struct ExchangeTokenResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub client_state: String,
    pub test: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<crate::authproviders::TestLoginUser>,
}

/// `POST <prefix>/exchangetoken`: logs in with an externally obtained token.
pub async fn exchange_token_handler(
    State(registry): State<Registry>,
    jar: CookieJar,
    Json(request): Json<ExchangeTokenRequest>,
) -> Result<(CookieJar, Json<ExchangeTokenResponse>), AuthError> {
    let (outcome, client_state) = registry
        .exchange_token(&request.external_token, &request.provider_type, &request.state)
        .await?;

    Ok(match outcome {
        LoginOutcome::Token { token, refresh } => {
            let jar = match refresh {
                Some(data) => {
                    jar.add(refresh_token_cookie(&data, &registry.paths().session_path_prefix))
                }
                None => jar,
            };
            (
                jar,
                Json(ExchangeTokenResponse {
                    token: Some(token.token),
                    client_state,
                    test: false,
                    user: None,
                }),
            )
        }
        LoginOutcome::Test(user) => (
            jar,
            Json(ExchangeTokenResponse {
                token: None,
                client_state,
                test: true,
                user: Some(user),
            }),
        ),
    })
}

fn error_redirect(registry: &Registry, provider_type: &str, state: &str, err: &AuthError) -> Response {
    debug!(provider_type = %provider_type, error = %err, "Login failed");
    let message = err.to_string();
    let url = fragment_url(
        &registry.paths().redirect_url,
        &[
            ("error", message.as_str()),
            ("type", provider_type),
            ("state", state),
        ],
    );
    Redirect::to(&url).into_response()
}

/// `base#k1=v1&k2=v2`, form-encoded.
fn fragment_url(base: &str, params: &[(&str, &str)]) -> String {
    let fragment = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    format!("{base}#{fragment}")
}

fn parse_pairs(input: &[u8]) -> HashMap<String, String> {
    form_urlencoded::parse(input).into_owned().collect()
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_url_encodes_values() {
        let url = fragment_url(
            "/auth/response/generic",
            &[("error", "bad thing & more"), ("type", "oidc"), ("state", "")],
        );
        assert_eq!(
            url,
            "/auth/response/generic#error=bad+thing+%26+more&type=oidc&state="
        );
    }

    #[test]
    fn test_is_form() {
        let mut headers = HeaderMap::new();
        assert!(!is_form(&headers));
        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded; charset=utf-8".parse().unwrap(),
        );
        assert!(is_form(&headers));
    }
}
