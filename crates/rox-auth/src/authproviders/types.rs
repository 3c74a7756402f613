//! Data exchanged between the registry, providers and backends.

use std::collections::HashMap;

use axum::http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::tokens::claims::ExternalUserClaim;

/// Stored configuration of one auth provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthProviderConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Display name, unique among stored providers.
    pub name: String,
    pub enabled: bool,
    pub validated: bool,
    /// Set once the provider completed its first successful login.
    pub active: bool,
    /// Hostnames the UI is served from.
    pub ui_endpoints: Vec<String>,
    pub extra_ui_endpoints: Vec<String>,
    /// Backend-specific settings.
    pub config: HashMap<String, String>,
    /// Claim path to attribute name.
    pub claim_mappings: HashMap<String, String>,
    pub required_attributes: Vec<RequiredAttribute>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_updated: Option<OffsetDateTime>,
}

impl AuthProviderConfig {
    /// UI endpoints followed by extra UI endpoints.
    #[must_use]
    pub fn all_ui_endpoints(&self) -> Vec<String> {
        self.ui_endpoints
            .iter()
            .chain(&self.extra_ui_endpoints)
            .cloned()
            .collect()
    }
}

/// An attribute value a user must carry to log in through a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredAttribute {
    pub attribute_key: String,
    pub attribute_value: String,
}

/// Opaque refresh token obtained from an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenData {
    pub refresh_token: String,
    #[serde(default)]
    pub refresh_token_type: String,
}

/// Protocol-independent result of a successful backend authentication.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResponse {
    pub claims: ExternalUserClaim,
    /// When the upstream credential stops being valid.
    pub expiration: OffsetDateTime,
    pub refresh_token_data: Option<RefreshTokenData>,
}

/// Information about the inbound request needed to build login URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Host (and port) the user agent used to reach the platform.
    pub hostname: String,
}

/// An identity-provider callback, decoupled from the HTTP framework.
#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub form: HashMap<String, String>,
    pub headers: HeaderMap,
}

impl CallbackRequest {
    /// Looks a parameter up in the form body first, then the query string.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.form
            .get(key)
            .or_else(|| self.query.get(key))
            .map(String::as_str)
    }

    /// Query parameters overlaid with form parameters.
    #[must_use]
    pub fn values(&self) -> HashMap<String, String> {
        let mut values = self.query.clone();
        values.extend(self.form.iter().map(|(k, v)| (k.clone(), v.clone())));
        values
    }

    /// Hostname the request was sent to, honoring `X-Forwarded-Host`.
    #[must_use]
    pub fn request_info(&self) -> RequestInfo {
        RequestInfo {
            hostname: hostname_from_headers(&self.headers),
        }
    }
}

/// Extracts the external hostname, preferring `X-Forwarded-Host` over `Host`.
#[must_use]
pub fn hostname_from_headers(headers: &HeaderMap) -> String {
    ["x-forwarded-host", "host"]
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}
