//! Token issuance and validation.
//!
//! An [`IssuerFactory`] owns the signing key and the table of registered
//! [`Source`]s. Each source gets its own [`Issuer`]; every token an issuer
//! produces names that source as its audience. The [`Validator`] verifies the
//! signature once and then asks every audience source whether it still
//! accepts the claims.
//!
//! # Example
//!
//! ```ignore
//! let factory = IssuerFactory::from_config(&auth_config)?;
//! let issuer = factory.create_issuer(&source, vec![TokenOption::Ttl(ttl)])?;
//!
//! let info = issuer.issue(rox_claims, &[])?;
//! let validated = factory.validator().validate(&info.token)?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use time::OffsetDateTime;
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::tokens::claims::{Claims, RoxClaims};
use crate::tokens::options::{TokenDraft, TokenOption};
use crate::tokens::signer::{Jwks, SigningError, SigningKeyPair, TokenSigner};
use crate::tokens::source::Source;

/// A signed token together with its decoded claims and accepting sources.
#[derive(Clone)]
pub struct TokenInfo {
    /// Compact serialized token.
    pub token: String,
    /// Claims embedded in the token.
    pub claims: Claims,
    /// Sources named in the audience.
    pub sources: Vec<Arc<dyn Source>>,
}

impl TokenInfo {
    /// Expiry of the token.
    #[must_use]
    pub fn expiry(&self) -> OffsetDateTime {
        self.claims.expiry()
    }
}

impl fmt::Debug for TokenInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenInfo")
            .field("claims", &self.claims)
            .field("sources", &self.sources.iter().map(|s| s.id()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

struct FactoryInner {
    signer: TokenSigner,
    sources: RwLock<HashMap<String, Weak<dyn Source>>>,
    global_options: Vec<TokenOption>,
}

/// Creates per-source issuers and validates tokens against them.
///
/// Cheap to clone; clones share the signing key and source table.
#[derive(Clone)]
pub struct IssuerFactory {
    inner: Arc<FactoryInner>,
}

impl IssuerFactory {
    /// Creates a factory from a signer and the options applied to every token.
    #[must_use]
    pub fn new(signer: TokenSigner, global_options: Vec<TokenOption>) -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                signer,
                sources: RwLock::new(HashMap::new()),
                global_options,
            }),
        }
    }

    /// Builds a factory from the auth configuration.
    ///
    /// Every token gets the configured default lifetime when nothing else sets
    /// one, and is capped at the configured maximum.
    ///
    /// # Errors
    /// Returns an error if the signing key cannot be loaded or generated.
    pub fn from_config(config: &AuthConfig) -> Result<Self, SigningError> {
        let key_pair = SigningKeyPair::from_config(&config.signing)?;
        let signer =
            TokenSigner::new(key_pair, config.issuer_id.clone()).with_leeway(config.tokens.leeway);
        Ok(Self::new(
            signer,
            vec![
                TokenOption::DefaultTtl(config.tokens.default_ttl),
                TokenOption::Ttl(config.tokens.max_ttl),
            ],
        ))
    }

    /// Registers `source` under its ID and returns an issuer for it.
    ///
    /// # Errors
    /// Returns `AlreadyExists` if a live source with the same ID is registered.
    pub fn create_issuer(
        &self,
        source: &Arc<dyn Source>,
        options: Vec<TokenOption>,
    ) -> AuthResult<Issuer> {
        self.create_issuer_for(source.id(), Arc::downgrade(source), options)
    }

    /// Registers a source under an explicit ID.
    ///
    /// Used when the source's own ID accessor does not yet reflect the ID it is
    /// being registered under (a provider still under construction).
    ///
    /// # Errors
    /// Returns `AlreadyExists` if a live source with the same ID is registered.
    pub fn create_issuer_for(
        &self,
        source_id: impl Into<String>,
        source: Weak<dyn Source>,
        options: Vec<TokenOption>,
    ) -> AuthResult<Issuer> {
        let source_id = source_id.into();
        if source_id.is_empty() {
            return Err(AuthError::invalid_args("token source ID must not be empty"));
        }

        {
            let mut sources = self
                .inner
                .sources
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if sources
                .get(&source_id)
                .is_some_and(|existing| existing.strong_count() > 0)
            {
                return Err(AuthError::already_exists(format!(
                    "token source {source_id:?} is already registered"
                )));
            }
            sources.insert(source_id.clone(), source);
        }

        debug!(source_id = %source_id, "Registered token source");
        Ok(Issuer {
            source_id,
            factory: self.clone(),
            options,
        })
    }

    /// Removes a source from the table. Tokens naming it stop validating.
    ///
    /// # Errors
    /// Returns `NotFound` if no source with this ID is registered.
    pub fn unregister_source(&self, source_id: &str) -> AuthResult<()> {
        let removed = self
            .inner
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(source_id);
        match removed {
            Some(_) => {
                debug!(source_id = %source_id, "Unregistered token source");
                Ok(())
            }
            None => Err(AuthError::not_found(format!(
                "token source {source_id:?} is not registered"
            ))),
        }
    }

    /// Returns `true` if a live source is registered under `source_id`.
    #[must_use]
    pub fn has_source(&self, source_id: &str) -> bool {
        self.lookup_source(source_id).is_ok()
    }

    /// Returns a validator sharing this factory's key and source table.
    #[must_use]
    pub fn validator(&self) -> Validator {
        Validator {
            factory: self.clone(),
        }
    }

    /// Public key set for downstream verifiers.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        self.inner.signer.jwks()
    }

    fn lookup_source(&self, source_id: &str) -> AuthResult<Arc<dyn Source>> {
        self.inner
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source_id)
            .and_then(Weak::upgrade)
            .ok_or_else(|| AuthError::not_found(format!("token source {source_id:?}")))
    }
}

impl fmt::Debug for IssuerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerFactory")
            .field("issuer", &self.inner.signer.issuer())
            .finish_non_exhaustive()
    }
}

/// Issues tokens on behalf of one source.
#[derive(Clone)]
pub struct Issuer {
    source_id: String,
    factory: IssuerFactory,
    options: Vec<TokenOption>,
}

impl Issuer {
    /// ID of the source this issuer signs for.
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Builds, checks and signs a token carrying `rox`.
    ///
    /// # Errors
    /// - `InvariantViolation` if no option layer set an expiry
    /// - `NotFound` if the source was unregistered
    /// - whatever the source's own validation returns
    pub fn issue(&self, rox: RoxClaims, options: &[TokenOption]) -> AuthResult<TokenInfo> {
        let now = OffsetDateTime::now_utc();
        let mut draft = TokenDraft::new(now);
        for option in options
            .iter()
            .chain(&self.options)
            .chain(&self.factory.inner.global_options)
        {
            option.apply(&mut draft);
        }

        let expiry = draft.expiry.ok_or_else(|| {
            AuthError::invariant_violation("no expiry set for token after applying all options")
        })?;
        if expiry <= now {
            return Err(AuthError::invalid_args("token expiry must be in the future"));
        }

        let claims = Claims {
            iss: self.factory.inner.signer.issuer().to_string(),
            sub: self.source_id.clone(),
            aud: vec![self.source_id.clone()],
            exp: expiry.unix_timestamp(),
            iat: now.unix_timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            rox,
            extra: draft.extra,
        };

        let source = self.factory.lookup_source(&self.source_id)?;
        source.validate(&claims)?;

        let token = self.factory.inner.signer.encode(&claims)?;
        Ok(TokenInfo {
            token,
            claims,
            sources: vec![source],
        })
    }
}

impl fmt::Debug for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Issuer")
            .field("source_id", &self.source_id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Verifies tokens and checks them against their audience sources.
#[derive(Clone, Debug)]
pub struct Validator {
    factory: IssuerFactory,
}

impl Validator {
    /// Validates `token`.
    ///
    /// # Errors
    /// Returns `NoCredentials` for any failure: bad signature, expiry, missing
    /// audience, unknown source, or a source rejecting the claims.
    pub fn validate(&self, token: &str) -> AuthResult<TokenInfo> {
        let claims: Claims = self.factory.inner.signer.decode(token)?;

        if claims.aud.is_empty() {
            return Err(AuthError::no_credentials("token has no audience"));
        }

        let mut sources = Vec::with_capacity(claims.aud.len());
        for source_id in &claims.aud {
            let source = self.factory.lookup_source(source_id).map_err(|_| {
                AuthError::no_credentials(format!("token references unknown source {source_id:?}"))
            })?;
            source.validate(&claims).map_err(|e| {
                AuthError::no_credentials(format!("token rejected by source {source_id:?}: {e}"))
            })?;
            sources.push(source);
        }

        Ok(TokenInfo {
            token: token.to_string(),
            claims,
            sources,
        })
    }
}
