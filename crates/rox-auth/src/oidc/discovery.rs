//! Issuer URL handling and OpenID provider metadata discovery.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use super::error::OidcClientError;

const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";
const INSECURE_SCHEME_PREFIX: &str = "https+insecure://";

/// A normalized issuer.
///
/// `insecure` is set for `https+insecure://` issuers, whose TLS certificates
/// are not verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerUrl {
    url: Url,
    insecure: bool,
}

impl IssuerUrl {
    /// Parses an issuer as configured by an administrator.
    ///
    /// A missing scheme means `https://`. Plain `http://` is accepted only
    /// when `allow_http` is set.
    ///
    /// # Errors
    /// `InvalidIssuer` if the value does not parse, `InvalidScheme` for any
    /// scheme other than https (or http when allowed).
    pub fn parse(raw: &str, allow_http: bool) -> Result<Self, OidcClientError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(OidcClientError::InvalidIssuer("issuer is empty".to_string()));
        }

        let (candidate, insecure) = if let Some(rest) = raw.strip_prefix(INSECURE_SCHEME_PREFIX) {
            (format!("https://{rest}"), true)
        } else if raw.contains("://") {
            (raw.to_string(), false)
        } else {
            (format!("https://{raw}"), false)
        };

        let url = Url::parse(&candidate)
            .map_err(|e| OidcClientError::InvalidIssuer(format!("{raw}: {e}")))?;
        match url.scheme() {
            "https" => {}
            "http" if allow_http => {}
            other => return Err(OidcClientError::InvalidScheme(other.to_string())),
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(OidcClientError::InvalidIssuer(format!("{raw}: no host")));
        }

        Ok(Self { url, insecure })
    }

    /// Issuer string as it appears in tokens (no trailing slash).
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.url.as_str().trim_end_matches('/')
    }

    /// Whether certificate verification is disabled for this issuer.
    #[must_use]
    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    /// Form written back into provider configs: normalized, but keeping the
    /// `https+insecure://` marker.
    #[must_use]
    pub fn config_value(&self) -> String {
        if self.insecure {
            let rest = self.as_str().trim_start_matches("https://");
            format!("{INSECURE_SCHEME_PREFIX}{rest}")
        } else {
            self.as_str().to_string()
        }
    }

    /// URL of the discovery document.
    #[must_use]
    pub fn discovery_url(&self) -> String {
        format!("{}{WELL_KNOWN_PATH}", self.as_str())
    }
}

/// Builds an HTTP client for talking to one issuer.
///
/// # Errors
/// `Network` if the TLS backend cannot be initialised.
pub fn http_client(timeout: Duration, insecure: bool) -> Result<reqwest::Client, OidcClientError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(insecure)
        .build()
        .map_err(OidcClientError::from)
}

/// Subset of the OpenID provider metadata the backends use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,

    #[serde(default)]
    pub authorization_endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    pub jwks_uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// Absent on some large public providers even though they support the
    /// usual modes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_modes_supported: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
}

impl ProviderMetadata {
    /// Returns `true` if the provider advertises `scope`.
    #[must_use]
    pub fn supports_scope(&self, scope: &str) -> bool {
        self.scopes_supported
            .as_ref()
            .is_some_and(|scopes| scopes.iter().any(|s| s == scope))
    }

    /// Parsed key set URL.
    ///
    /// # Errors
    /// `Parse` if the document carries an unparseable `jwks_uri`.
    pub fn jwks_url(&self) -> Result<Url, OidcClientError> {
        Url::parse(&self.jwks_uri)
            .map_err(|e| OidcClientError::Parse(format!("jwks_uri {:?}: {e}", self.jwks_uri)))
    }
}

/// Fetches and checks the discovery document of `issuer`.
///
/// # Errors
/// Network and parse failures, or `IssuerMismatch` when the document names
/// another issuer.
pub async fn fetch_metadata(
    client: &reqwest::Client,
    issuer: &IssuerUrl,
) -> Result<ProviderMetadata, OidcClientError> {
    let url = issuer.discovery_url();
    tracing::debug!(issuer = %issuer.as_str(), "Fetching OIDC discovery document");

    let response = client
        .get(&url)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(issuer = %issuer.as_str(), error = %e, "Discovery request failed");
            OidcClientError::from(e)
        })?;

    if !response.status().is_success() {
        return Err(OidcClientError::Http {
            status: response.status().as_u16(),
        });
    }

    let metadata: ProviderMetadata = response
        .json()
        .await
        .map_err(|e| OidcClientError::Parse(e.to_string()))?;

    if metadata.issuer.trim_end_matches('/') != issuer.as_str() {
        return Err(OidcClientError::IssuerMismatch {
            expected: issuer.as_str().to_string(),
            actual: metadata.issuer,
        });
    }

    Ok(metadata)
}

struct CachedMetadata {
    metadata: ProviderMetadata,
    expires_at: Instant,
}

/// Discovery documents keyed by issuer, reused for `ttl`.
pub struct DiscoveryCache {
    client: reqwest::Client,
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedMetadata>>,
}

impl DiscoveryCache {
    #[must_use]
    pub fn new(client: reqwest::Client, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached document, fetching it when absent or stale.
    ///
    /// # Errors
    /// See [`fetch_metadata`].
    pub async fn get(&self, issuer: &IssuerUrl) -> Result<ProviderMetadata, OidcClientError> {
        {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(issuer.as_str())
                && Instant::now() < cached.expires_at
            {
                return Ok(cached.metadata.clone());
            }
        }

        let metadata = fetch_metadata(&self.client, issuer).await?;
        self.entries.write().await.insert(
            issuer.as_str().to_string(),
            CachedMetadata {
                metadata: metadata.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(metadata)
    }

    /// Drops a cached document so the next lookup refetches it.
    pub async fn invalidate(&self, issuer: &IssuerUrl) {
        self.entries.write().await.remove(issuer.as_str());
    }

    /// The HTTP client the cache fetches with.
    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}
