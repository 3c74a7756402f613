//! Signature and registered-claim verification of provider-issued ID tokens.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Validation, decode, decode_header};
use serde_json::{Map, Value};
use url::Url;

use super::error::OidcClientError;
use super::jwks::{JwksCache, KeyCandidate};

/// Raw claim set of a verified ID token.
pub type IdTokenClaims = Map<String, Value>;

/// Verifies ID tokens of one issuer against its published keys.
#[derive(Clone)]
pub struct IdTokenVerifier {
    issuer: String,
    audience: Option<String>,
    jwks_uri: Url,
    jwks: Arc<JwksCache>,
    leeway: Duration,
}

impl IdTokenVerifier {
    /// `audience` is the client ID the token must be issued to. `None`
    /// skips the audience check, which machine tokens need because their
    /// audience is chosen by the workload.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        audience: Option<String>,
        jwks_uri: Url,
        jwks: Arc<JwksCache>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience,
            jwks_uri,
            jwks,
            leeway: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Verifies signature, issuer, expiry and (when configured) audience.
    ///
    /// # Errors
    /// `InvalidToken` for any verification failure, key set errors otherwise.
    pub async fn verify(&self, raw: &str) -> Result<IdTokenClaims, OidcClientError> {
        let header = decode_header(raw)?;

        let candidates: Vec<KeyCandidate> = match header.kid.as_deref() {
            Some(kid) => vec![self.jwks.get_key(&self.jwks_uri, kid).await?],
            None => self.jwks.signing_keys(&self.jwks_uri).await?,
        };

        let mut last_error = None;
        for (key, key_alg) in candidates {
            let alg = key_alg.unwrap_or(header.alg);
            let mut validation = Validation::new(alg);
            validation.set_issuer(&[self.issuer.as_str()]);
            validation.set_required_spec_claims(&["exp", "iss"]);
            validation.leeway = self.leeway.as_secs();
            match &self.audience {
                Some(audience) => validation.set_audience(&[audience.as_str()]),
                None => validation.validate_aud = false,
            }

            match decode::<IdTokenClaims>(raw, &key, &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.map_or(OidcClientError::NoSigningKeys, OidcClientError::from))
    }
}

/// Expiry (`exp`) of a verified claim set as a Unix timestamp.
#[must_use]
pub fn expiry_of(claims: &IdTokenClaims) -> Option<i64> {
    claims.get("exp").and_then(Value::as_i64)
}

/// String value of a top-level claim.
#[must_use]
pub fn string_claim<'a>(claims: &'a IdTokenClaims, name: &str) -> Option<&'a str> {
    claims.get(name).and_then(Value::as_str)
}
