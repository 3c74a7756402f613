//! Connection to one OpenID provider: metadata, token endpoint, userinfo and
//! ID token verification.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::discovery::{IssuerUrl, ProviderMetadata, fetch_metadata, http_client};
use super::error::OidcClientError;
use super::idtoken::{IdTokenClaims, IdTokenVerifier};
use super::jwks::{JwksCache, JwksCacheConfig};
use crate::config::OidcSettings;
use crate::error::AuthResult;

/// Response of the token endpoint, also used for implicit-flow parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenEndpointResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Kept raw: providers send numbers, numeric strings or garbage.
    #[serde(default)]
    pub expires_in: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client ID and optional secret registered at the provider.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

/// Operations the OIDC backend needs from its provider.
#[async_trait]
pub trait OidcProviderClient: Send + Sync {
    fn metadata(&self) -> &ProviderMetadata;

    /// Verifies signature, issuer, audience and expiry of an ID token.
    async fn verify_id_token(&self, raw: &str) -> AuthResult<IdTokenClaims>;

    /// Redeems an authorization code.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> AuthResult<TokenEndpointResponse>;

    /// Fetches the userinfo claims for an access token.
    async fn user_info(&self, access_token: &str) -> AuthResult<Map<String, Value>>;

    /// Uses a refresh token at the token endpoint.
    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenEndpointResponse>;
}

/// Establishes provider connections when backends are created.
#[async_trait]
pub trait OidcConnector: Send + Sync {
    async fn connect(
        &self,
        issuer: &IssuerUrl,
        credentials: &ClientCredentials,
    ) -> AuthResult<Arc<dyn OidcProviderClient>>;
}

/// Connector that talks HTTP to real providers.
#[derive(Debug, Clone)]
pub struct HttpOidcConnector {
    settings: OidcSettings,
}

impl HttpOidcConnector {
    #[must_use]
    pub fn new(settings: OidcSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl OidcConnector for HttpOidcConnector {
    async fn connect(
        &self,
        issuer: &IssuerUrl,
        credentials: &ClientCredentials,
    ) -> AuthResult<Arc<dyn OidcProviderClient>> {
        let http = http_client(self.settings.request_timeout, issuer.is_insecure())?;
        let metadata = fetch_metadata(&http, issuer).await?;

        let jwks = Arc::new(JwksCache::new(
            http.clone(),
            JwksCacheConfig {
                default_ttl: self.settings.metadata_cache_ttl,
                allow_http: self.settings.allow_http,
                ..JwksCacheConfig::default()
            },
        ));
        let verifier = IdTokenVerifier::new(
            metadata.issuer.clone(),
            Some(credentials.client_id.clone()),
            metadata.jwks_url()?,
            jwks,
        );

        tracing::info!(issuer = %issuer.as_str(), "Connected to OIDC provider");
        Ok(Arc::new(HttpOidcClient {
            http,
            metadata,
            credentials: credentials.clone(),
            verifier,
        }))
    }
}

struct HttpOidcClient {
    http: reqwest::Client,
    metadata: ProviderMetadata,
    credentials: ClientCredentials,
    verifier: IdTokenVerifier,
}

impl HttpOidcClient {
    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenEndpointResponse, OidcClientError> {
        let endpoint = self
            .metadata
            .token_endpoint
            .as_deref()
            .ok_or(OidcClientError::MissingEndpoint("token_endpoint"))?;

        let response = self
            .http
            .post(endpoint)
            .basic_auth(
                &self.credentials.client_id,
                self.credentials.client_secret.as_deref(),
            )
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            if let Ok(oauth) = serde_json::from_str::<OAuthErrorResponse>(&body) {
                return Err(OidcClientError::OAuth {
                    error: oauth.error,
                    description: oauth.error_description.unwrap_or_default(),
                });
            }
            return Err(OidcClientError::Http { status });
        }

        response
            .json()
            .await
            .map_err(|e| OidcClientError::Parse(format!("token response: {e}")))
    }
}

#[async_trait]
impl OidcProviderClient for HttpOidcClient {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn verify_id_token(&self, raw: &str) -> AuthResult<IdTokenClaims> {
        Ok(self.verifier.verify(raw).await?)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> AuthResult<TokenEndpointResponse> {
        tracing::debug!(issuer = %self.metadata.issuer, "Redeeming authorization code");
        Ok(self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .await?)
    }

    async fn user_info(&self, access_token: &str) -> AuthResult<Map<String, Value>> {
        let endpoint = self
            .metadata
            .userinfo_endpoint
            .as_deref()
            .ok_or(OidcClientError::MissingEndpoint("userinfo_endpoint"))?;

        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(OidcClientError::from)?;
        if !response.status().is_success() {
            return Err(OidcClientError::Http {
                status: response.status().as_u16(),
            }
            .into());
        }

        Ok(response
            .json()
            .await
            .map_err(|e| OidcClientError::Parse(format!("userinfo response: {e}")))?)
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenEndpointResponse> {
        Ok(self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?)
    }
}
