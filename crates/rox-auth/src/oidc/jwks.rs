//! Provider key set fetching and caching.
//!
//! Key sets are cached per URI. The TTL comes from the response's
//! `Cache-Control: max-age`, clamped to the configured bounds. An unknown
//! `kid` forces a refetch so rotated keys are picked up.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;
use url::Url;

use super::error::OidcClientError;

/// Cache TTL bounds.
#[derive(Debug, Clone)]
pub struct JwksCacheConfig {
    /// TTL when the response has no `max-age`.
    pub default_ttl: Duration,
    pub min_ttl: Duration,
    pub max_ttl: Duration,
    /// Accept `http://` key set URLs.
    pub allow_http: bool,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            min_ttl: Duration::from_secs(300),
            max_ttl: Duration::from_secs(86400),
            allow_http: false,
        }
    }
}

struct CachedJwks {
    jwks: JwkSet,
    expires_at: Instant,
}

/// A decoding key plus the algorithm its JWK declares, if any.
pub type KeyCandidate = (DecodingKey, Option<Algorithm>);

/// In-memory cache of provider key sets.
pub struct JwksCache {
    http_client: reqwest::Client,
    cache: RwLock<HashMap<String, CachedJwks>>,
    config: JwksCacheConfig,
}

impl JwksCache {
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: JwksCacheConfig) -> Self {
        Self {
            http_client,
            cache: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Gets the key with ID `kid`, refetching once on a miss.
    ///
    /// # Errors
    /// Fetch failures, or `KeyNotFound` when the fresh key set lacks `kid`.
    pub async fn get_key(&self, jwks_uri: &Url, kid: &str) -> Result<KeyCandidate, OidcClientError> {
        if let Some(found) = self.cached_key(jwks_uri, kid).await {
            tracing::trace!(kid, jwks_uri = %jwks_uri, "JWKS cache hit");
            return Ok(found);
        }

        tracing::debug!(kid, jwks_uri = %jwks_uri, "JWKS cache miss");
        self.refresh(jwks_uri).await?;

        self.cached_key(jwks_uri, kid)
            .await
            .ok_or_else(|| OidcClientError::KeyNotFound(kid.to_string()))
    }

    async fn cached_key(&self, jwks_uri: &Url, kid: &str) -> Option<KeyCandidate> {
        let cache = self.cache.read().await;
        let cached = cache.get(&normalize_uri(jwks_uri))?;
        if Instant::now() >= cached.expires_at {
            return None;
        }
        cached
            .jwks
            .keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))
            .and_then(|jwk| {
                DecodingKey::from_jwk(jwk)
                    .ok()
                    .map(|key| (key, jwk_algorithm(jwk)))
            })
    }

    /// All signing keys of the set, for tokens without a `kid`.
    ///
    /// # Errors
    /// Fetch failures, or `NoSigningKeys` when nothing usable is published.
    pub async fn signing_keys(&self, jwks_uri: &Url) -> Result<Vec<KeyCandidate>, OidcClientError> {
        self.ensure_cached(jwks_uri).await?;

        let cache = self.cache.read().await;
        let Some(cached) = cache.get(&normalize_uri(jwks_uri)) else {
            return Err(OidcClientError::NoSigningKeys);
        };

        let keys: Vec<_> = cached
            .jwks
            .keys
            .iter()
            .filter(|k| !matches!(k.common.public_key_use, Some(PublicKeyUse::Encryption)))
            .filter_map(|jwk| {
                DecodingKey::from_jwk(jwk)
                    .ok()
                    .map(|key| (key, jwk_algorithm(jwk)))
            })
            .collect();

        if keys.is_empty() {
            Err(OidcClientError::NoSigningKeys)
        } else {
            Ok(keys)
        }
    }

    async fn ensure_cached(&self, jwks_uri: &Url) -> Result<(), OidcClientError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&normalize_uri(jwks_uri))
                && Instant::now() < cached.expires_at
            {
                return Ok(());
            }
        }
        self.refresh(jwks_uri).await
    }

    /// Fetches the key set unconditionally and replaces the cached copy.
    ///
    /// # Errors
    /// `InvalidScheme`, network, status or parse failures.
    pub async fn refresh(&self, jwks_uri: &Url) -> Result<(), OidcClientError> {
        match jwks_uri.scheme() {
            "https" => {}
            "http" if self.config.allow_http => {}
            other => return Err(OidcClientError::InvalidScheme(other.to_string())),
        }

        tracing::debug!(jwks_uri = %jwks_uri, "Fetching JWKS");
        let response = self
            .http_client
            .get(jwks_uri.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(jwks_uri = %jwks_uri, error = %e, "Failed to fetch JWKS");
                OidcClientError::from(e)
            })?;

        if !response.status().is_success() {
            return Err(OidcClientError::Http {
                status: response.status().as_u16(),
            });
        }

        let ttl = self.ttl_from_headers(response.headers());
        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| OidcClientError::Parse(e.to_string()))?;

        tracing::debug!(jwks_uri = %jwks_uri, keys = jwks.keys.len(), ttl = ?ttl, "Cached JWKS");
        self.cache.write().await.insert(
            normalize_uri(jwks_uri),
            CachedJwks {
                jwks,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn ttl_from_headers(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        headers
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(max_age)
            .map_or(self.config.default_ttl, Duration::from_secs)
            .clamp(self.config.min_ttl, self.config.max_ttl)
    }
}

fn max_age(cache_control: &str) -> Option<u64> {
    cache_control
        .split(',')
        .find_map(|directive| directive.trim().strip_prefix("max-age="))
        .and_then(|seconds| seconds.parse().ok())
}

fn normalize_uri(uri: &Url) -> String {
    uri.as_str().trim_end_matches('/').to_string()
}

fn jwk_algorithm(jwk: &jsonwebtoken::jwk::Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}
