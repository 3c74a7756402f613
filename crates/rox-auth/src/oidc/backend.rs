//! OIDC backend: one configured connection to an OpenID provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use url::Url;

use super::client::{OidcProviderClient, TokenEndpointResponse};
use super::idtoken::{expiry_of, string_claim};
use super::negotiate::{ResponseMode, ResponseType};
use super::nonce::NoncePool;
use crate::authproviders::{
    AuthResponse, Backend, CallbackRequest, RefreshTokenData, RequestInfo, make_state,
};
use crate::error::{AuthError, AuthResult};
use crate::roles::{ClaimAttributes, apply_claim_mappings, flatten_claims};
use crate::tokens::ExternalUserClaim;

/// Attribute names every OIDC login yields.
pub const USERID_ATTRIBUTE: &str = "userid";
pub const NAME_ATTRIBUTE: &str = "name";
pub const EMAIL_ATTRIBUTE: &str = "email";
pub const GROUPS_ATTRIBUTE: &str = "groups";

const REFRESH_TOKEN_TYPE: &str = "refresh_token";

/// Upper bound on a provider-reported `expires_in`.
const MAX_EXPIRES_IN_SECS: u64 = 366 * 24 * 3600;

/// Everything a backend needs, assembled by the factory.
pub(crate) struct OidcBackendParams {
    pub provider_id: String,
    pub client: Arc<dyn OidcProviderClient>,
    pub client_id: String,
    pub mode: ResponseMode,
    pub response_type: ResponseType,
    pub scopes: Vec<String>,
    pub callback_path: String,
    pub fragment_callback_path: String,
    pub allowed_hosts: Vec<String>,
    pub config: HashMap<String, String>,
    pub claim_mappings: HashMap<String, String>,
    pub nonces: Arc<NoncePool>,
    pub default_access_token_ttl: Duration,
}

/// Backend for one OIDC auth provider.
pub struct OidcBackend {
    params: OidcBackendParams,
}

/// A verified login result together with how long it is good for.
struct Candidate {
    response: AuthResponse,
    // Access tokens without `expires_in` get an assumed expiry.
    assumed_expiry: bool,
}

impl OidcBackend {
    pub(crate) fn new(params: OidcBackendParams) -> Self {
        Self { params }
    }

    fn redirect_uri(&self, hostname: &str) -> AuthResult<String> {
        let host = if hostname.is_empty() {
            self.params
                .allowed_hosts
                .first()
                .map(String::as_str)
                .ok_or_else(|| AuthError::invalid_args("cannot determine the request hostname"))?
        } else {
            if !self.params.allowed_hosts.is_empty()
                && !self.params.allowed_hosts.iter().any(|h| h == hostname)
            {
                return Err(AuthError::invalid_args(format!(
                    "hostname {hostname:?} is not one of the configured UI endpoints"
                )));
            }
            hostname
        };

        let path = if self.params.mode == ResponseMode::Fragment {
            &self.params.fragment_callback_path
        } else {
            &self.params.callback_path
        };
        Ok(format!("https://{host}{path}"))
    }

    async fn process_values(
        &self,
        values: &HashMap<String, String>,
        hostname: &str,
    ) -> AuthResult<AuthResponse> {
        if let Some(code) = values.get("error") {
            return Err(AuthError::no_credentials(idp_error_message(
                code,
                values.get("error_description").map(String::as_str),
            )));
        }

        let mut errors = Vec::new();
        let candidate = if self.params.response_type.has_code() {
            match values.get("code") {
                None => {
                    errors.push("'code' field not found in response data".to_string());
                    None
                }
                Some(code) => {
                    let redirect_uri = self.redirect_uri(hostname)?;
                    match self.params.client.exchange_code(code, &redirect_uri).await {
                        Ok(tokens) => self.verify_token_response(&tokens, true, &mut errors).await,
                        Err(e) => {
                            errors.push(format!("exchanging authorization code: {e}"));
                            None
                        }
                    }
                }
            }
        } else {
            let tokens = TokenEndpointResponse {
                access_token: values.get("access_token").cloned(),
                id_token: values.get("id_token").cloned(),
                expires_in: values.get("expires_in").cloned().map(Value::String),
                ..TokenEndpointResponse::default()
            };
            self.verify_token_response(&tokens, true, &mut errors).await
        };

        candidate.ok_or_else(|| {
            tracing::debug!(
                provider_id = %self.params.provider_id,
                errors = errors.len(),
                "OIDC response yielded no usable token"
            );
            AuthError::no_credentials(errors.join("; "))
        })
    }

    /// Verifies whatever tokens a response carries and picks the one that
    /// lives longest.
    async fn verify_token_response(
        &self,
        tokens: &TokenEndpointResponse,
        check_nonce: bool,
        errors: &mut Vec<String>,
    ) -> Option<AuthResponse> {
        let from_id_token = match &tokens.id_token {
            Some(raw) => match self.id_token_candidate(raw, check_nonce).await {
                Ok(candidate) => Some(candidate),
                Err(e) => {
                    errors.push(format!("ID token verification failed: {e}"));
                    // A presented ID token that fails verification rejects the whole response.
                    if check_nonce {
                        return None;
                    }
                    None
                }
            },
            None => {
                let rt = &self.params.response_type;
                if rt.has_id_token() || (rt.has_code() && tokens.access_token.is_none()) {
                    errors.push("no id_token field found in response".to_string());
                }
                None
            }
        };

        let from_access_token = match &tokens.access_token {
            Some(raw) => match self.access_token_candidate(raw, tokens.expires_in.as_ref()).await {
                Ok(candidate) => Some(candidate),
                Err(e) => {
                    errors.push(format!("fetching user info with access token: {e}"));
                    None
                }
            },
            None => {
                if self.params.response_type.has_token() {
                    errors.push("no access_token field found in response".to_string());
                }
                None
            }
        };

        let chosen = match (from_id_token, from_access_token) {
            (Some(id), Some(access)) => {
                if access.assumed_expiry || access.response.expiration >= id.response.expiration {
                    access
                } else {
                    id
                }
            }
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => return None,
        };

        let mut response = chosen.response;
        if let Some(refresh_token) = tokens.refresh_token.as_ref().filter(|t| !t.is_empty()) {
            response.refresh_token_data = Some(RefreshTokenData {
                refresh_token: refresh_token.clone(),
                refresh_token_type: REFRESH_TOKEN_TYPE.to_string(),
            });
        }
        Some(response)
    }

    async fn id_token_candidate(&self, raw: &str, check_nonce: bool) -> AuthResult<Candidate> {
        let claims = self.params.client.verify_id_token(raw).await?;

        if check_nonce {
            let nonce = string_claim(&claims, "nonce")
                .ok_or_else(|| AuthError::no_credentials("ID token has no nonce"))?;
            if !self.params.nonces.consume(nonce) {
                return Err(AuthError::no_credentials("invalid nonce"));
            }
        }

        let expiration = expiry_of(&claims)
            .and_then(|exp| OffsetDateTime::from_unix_timestamp(exp).ok())
            .ok_or_else(|| AuthError::no_credentials("ID token has no valid expiry"))?;

        Ok(Candidate {
            response: AuthResponse {
                claims: self.user_claim(&claims)?,
                expiration,
                refresh_token_data: None,
            },
            assumed_expiry: false,
        })
    }

    async fn access_token_candidate(
        &self,
        raw: &str,
        expires_in: Option<&Value>,
    ) -> AuthResult<Candidate> {
        let claims = self.params.client.user_info(raw).await?;
        let seconds = expires_in
            .and_then(positive_seconds)
            .map(|s| s.min(MAX_EXPIRES_IN_SECS));
        let ttl = seconds.map_or(self.params.default_access_token_ttl, Duration::from_secs);

        Ok(Candidate {
            response: AuthResponse {
                claims: self.user_claim(&claims)?,
                expiration: OffsetDateTime::now_utc() + ttl,
                refresh_token_data: None,
            },
            assumed_expiry: seconds.is_none(),
        })
    }

    fn user_claim(&self, claims: &Map<String, Value>) -> AuthResult<ExternalUserClaim> {
        let user_id = string_claim(claims, "sub").unwrap_or_default();
        if user_id.is_empty() {
            return Err(AuthError::no_credentials("identity has no subject"));
        }
        let full_name = string_claim(claims, "name").unwrap_or_default();
        let email = string_claim(claims, "email").unwrap_or_default();

        let flattened = flatten_claims(claims);
        let mut attributes = ClaimAttributes::new();
        attributes.insert(USERID_ATTRIBUTE.to_string(), vec![user_id.to_string()]);
        if !full_name.is_empty() {
            attributes.insert(NAME_ATTRIBUTE.to_string(), vec![full_name.to_string()]);
        }
        if !email.is_empty() {
            attributes.insert(EMAIL_ATTRIBUTE.to_string(), vec![email.to_string()]);
        }
        if let Some(groups) = flattened.get(GROUPS_ATTRIBUTE) {
            attributes.insert(GROUPS_ATTRIBUTE.to_string(), groups.clone());
        }
        apply_claim_mappings(&flattened, &self.params.claim_mappings, &mut attributes);

        Ok(ExternalUserClaim {
            user_id: user_id.to_string(),
            full_name: full_name.to_string(),
            email: email.to_string(),
            attributes,
        })
    }
}

#[async_trait]
impl Backend for OidcBackend {
    fn config(&self) -> HashMap<String, String> {
        self.params.config.clone()
    }

    fn login_url(&self, client_state: &str, request: &RequestInfo) -> AuthResult<Option<String>> {
        let metadata = self.params.client.metadata();
        let mut url = Url::parse(&metadata.authorization_endpoint).map_err(|e| {
            AuthError::internal(format!(
                "authorization endpoint {:?}: {e}",
                metadata.authorization_endpoint
            ))
        })?;

        let redirect_uri = self.redirect_uri(&request.hostname)?;
        let state = make_state(&self.params.provider_id, client_state);
        let scope = self.params.scopes.join(" ");
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.params.client_id)
                .append_pair("redirect_uri", &redirect_uri)
                .append_pair("response_type", self.params.response_type.as_str())
                .append_pair("response_mode", self.params.mode.as_str())
                .append_pair("scope", &scope)
                .append_pair("state", &state);
            if self.params.response_type.needs_nonce() {
                query.append_pair("nonce", &self.params.nonces.generate());
            }
        }
        Ok(Some(url.into()))
    }

    async fn process_http_request(
        &self,
        request: &CallbackRequest,
    ) -> AuthResult<Option<AuthResponse>> {
        let hostname = request.request_info().hostname;
        self.process_values(&request.values(), &hostname)
            .await
            .map(Some)
    }

    async fn exchange_token(
        &self,
        external_token: &str,
        state: &str,
    ) -> AuthResult<(AuthResponse, String)> {
        let values = response_values(external_token);
        let response = self.process_values(&values, "").await?;
        Ok((response, state.to_string()))
    }

    async fn refresh_access_token(&self, refresh: &RefreshTokenData) -> AuthResult<AuthResponse> {
        if refresh.refresh_token_type != REFRESH_TOKEN_TYPE {
            return Err(AuthError::invalid_args(format!(
                "unsupported refresh token type {:?}",
                refresh.refresh_token_type
            )));
        }

        let tokens = self.params.client.refresh(&refresh.refresh_token).await?;
        let mut errors = Vec::new();
        self.verify_token_response(&tokens, false, &mut errors)
            .await
            .ok_or_else(|| AuthError::no_credentials(errors.join("; ")))
    }
}

/// Values of an externally delivered response.
///
/// The browser posts the fragment of the redirect as form data. A bare JWT
/// (no recognised keys) is taken as an ID token.
fn response_values(external_token: &str) -> HashMap<String, String> {
    let values: HashMap<String, String> = url::form_urlencoded::parse(external_token.as_bytes())
        .into_owned()
        .collect();
    let recognised = ["id_token", "access_token", "code", "error"]
        .iter()
        .any(|key| values.contains_key(*key));
    if recognised {
        values
    } else {
        HashMap::from([("id_token".to_string(), external_token.trim().to_string())])
    }
}

/// Message shown to the user for an `error` returned by the provider.
#[must_use]
pub fn idp_error_message(code: &str, description: Option<&str>) -> String {
    let mut message = if code == "unauthorized_client" {
        "Identity provider claims that this authentication provider configuration is not authorized to request an authorization code or access token using this method.".to_string()
    } else {
        format!("Identity provider returned a {code:?} error.")
    };
    if let Some(description) = description.filter(|d| !d.is_empty()) {
        message.push_str(" Additional information from the provider follows. ");
        message.push_str(description);
    }
    message
}

/// `expires_in` as a positive number of seconds, if it is one.
fn positive_seconds(value: &Value) -> Option<u64> {
    let seconds = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    (seconds > 0).then_some(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_idp_error_messages() {
        assert_eq!(
            idp_error_message("code1", None),
            "Identity provider returned a \"code1\" error."
        );
        assert_eq!(
            idp_error_message("code2", Some("Blah blah blah.")),
            "Identity provider returned a \"code2\" error. Additional information from the provider follows. Blah blah blah."
        );
        assert!(
            idp_error_message("unauthorized_client", Some("Implicit flow is disabled."))
                .starts_with("Identity provider claims that this authentication provider configuration is not authorized")
        );
    }

    #[test]
    fn test_expires_in_parsing() {
        assert_eq!(positive_seconds(&json!(3600)), Some(3600));
        assert_eq!(positive_seconds(&json!("604800")), Some(604_800));
        assert_eq!(positive_seconds(&json!("garbage")), None);
        assert_eq!(positive_seconds(&json!(0)), None);
        assert_eq!(positive_seconds(&json!(-5)), None);
    }

    #[test]
    fn test_response_values() {
        let values = response_values("access_token=abc&state=p%3Ax&expires_in=60");
        assert_eq!(values["access_token"], "abc");
        assert_eq!(values["state"], "p:x");

        let values = response_values("eyJhbGciOiJSUzI1NiJ9.eyJzdWIiOiJ4In0.sig");
        assert_eq!(values["id_token"], "eyJhbGciOiJSUzI1NiJ9.eyJzdWIiOiJ4In0.sig");
    }
}
