//! In-process provider client for OIDC backend tests.
//!
//! ID tokens are plain `uid|name|email|nonce` strings; the literal
//! `invalid` fails verification.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;

use super::client::{ClientCredentials, OidcConnector, OidcProviderClient, TokenEndpointResponse};
use super::discovery::{IssuerUrl, ProviderMetadata};
use super::idtoken::IdTokenClaims;
use crate::error::{AuthError, AuthResult};

pub(crate) const ALL_RESPONSE_TYPES: [&str; 7] = [
    "code",
    "token",
    "id_token",
    "code token",
    "code id_token",
    "token id_token",
    "code token id_token",
];

pub(crate) fn metadata(types: &[&str], modes: &[&str]) -> ProviderMetadata {
    ProviderMetadata {
        issuer: "https://test-issuer".into(),
        authorization_endpoint: "https://test-issuer/authorize".into(),
        token_endpoint: Some("https://test-issuer/token".into()),
        jwks_uri: "https://test-issuer/keys".into(),
        userinfo_endpoint: Some("https://test-issuer/userinfo".into()),
        response_types_supported: types.iter().map(ToString::to_string).collect(),
        response_modes_supported: Some(modes.iter().map(ToString::to_string).collect()),
        scopes_supported: Some(
            ["openid", "profile", "email", "offline_access"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        ),
    }
}

pub(crate) fn id_token(uid: &str, name: &str, email: &str, nonce: &str) -> String {
    format!("{uid}|{name}|{email}|{nonce}")
}

pub(crate) fn userinfo(uid: &str, name: &str, email: &str) -> Map<String, Value> {
    let Value::Object(map) = json!({"sub": uid, "name": name, "email": email}) else {
        unreachable!()
    };
    map
}

pub(crate) struct MockClient {
    pub metadata: ProviderMetadata,
    /// `None` makes the userinfo endpoint fail.
    pub userinfo: Option<Map<String, Value>>,
    pub exchanged: Mutex<Option<TokenEndpointResponse>>,
    pub refreshed: Mutex<Option<TokenEndpointResponse>>,
    pub last_redirect_uri: Mutex<Option<String>>,
}

impl MockClient {
    pub(crate) fn new(metadata: ProviderMetadata, userinfo: Option<Map<String, Value>>) -> Self {
        Self {
            metadata,
            userinfo,
            exchanged: Mutex::new(None),
            refreshed: Mutex::new(None),
            last_redirect_uri: Mutex::new(None),
        }
    }
}

#[async_trait]
impl OidcProviderClient for MockClient {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn verify_id_token(&self, raw: &str) -> AuthResult<IdTokenClaims> {
        let parts: Vec<&str> = raw.split('|').collect();
        let [uid, name, email, nonce] = parts.as_slice() else {
            return Err(AuthError::no_credentials("invalid token"));
        };
        let exp = (OffsetDateTime::now_utc() + time::Duration::minutes(2)).unix_timestamp();
        let Value::Object(claims) = json!({
            "iss": self.metadata.issuer,
            "sub": uid,
            "name": name,
            "email": email,
            "nonce": nonce,
            "exp": exp,
            "groups": ["team-a"],
        }) else {
            unreachable!()
        };
        Ok(claims)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> AuthResult<TokenEndpointResponse> {
        *self.last_redirect_uri.lock().unwrap() = Some(redirect_uri.to_string());
        if code != "mock-authz-code" {
            return Err(AuthError::no_credentials("invalid_grant"));
        }
        self.exchanged
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AuthError::internal("exchange not prepared"))
    }

    async fn user_info(&self, access_token: &str) -> AuthResult<Map<String, Value>> {
        assert_eq!(access_token, "mock-access-token");
        self.userinfo
            .clone()
            .ok_or_else(|| AuthError::internal("simulated userinfo failure"))
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenEndpointResponse> {
        assert_eq!(refresh_token, "mock-refresh-token");
        self.refreshed
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AuthError::internal("refresh not prepared"))
    }
}

/// Hands out one shared [`MockClient`] and records the issuers it saw.
pub(crate) struct MockConnector {
    pub client: Arc<MockClient>,
    pub seen: Mutex<Vec<IssuerUrl>>,
}

impl MockConnector {
    pub(crate) fn new(client: MockClient) -> Self {
        Self {
            client: Arc::new(client),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl OidcConnector for MockConnector {
    async fn connect(
        &self,
        issuer: &IssuerUrl,
        _credentials: &ClientCredentials,
    ) -> AuthResult<Arc<dyn OidcProviderClient>> {
        self.seen.lock().unwrap().push(issuer.clone());
        Ok(Arc::clone(&self.client) as Arc<dyn OidcProviderClient>)
    }
}
