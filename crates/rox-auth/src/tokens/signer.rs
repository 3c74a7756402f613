//! Signing key material and compact JWT encoding for platform tokens.
//!
//! Supported algorithms:
//!
//! - **RS256** / **RS384**: RSA with SHA-256 / SHA-384
//! - **ES384**: ECDSA with the P-384 curve (default, small keys, fast to generate)
//!
//! ## Example
//!
//! ```ignore
//! use rox_auth::tokens::signer::{SigningKeyPair, TokenSigner};
//!
//! let key_pair = SigningKeyPair::generate_ec()?;
//! let signer = TokenSigner::new(key_pair, "https://stackrox.io/jwt");
//!
//! let token = signer.encode(&claims)?;
//! let decoded: Claims = signer.decode(&token)?;
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::{DecodePrivateKey as EcDecodePrivateKey, EncodePrivateKey as EcEncodePrivateKey};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::SigningConfig;
use crate::error::AuthError;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while handling key material or compact tokens.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {message}")]
    EncodingError {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a token.
    #[error("Failed to decode token: {message}")]
    DecodingError {
        /// Description of the decoding error.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid.
    #[error("Invalid claims: {message}")]
    InvalidClaims {
        /// Description of why claims are invalid.
        message: String,
    },

    /// Failed to generate a cryptographic key.
    #[error("Key generation error: {message}")]
    KeyGenerationError {
        /// Description of the key generation error.
        message: String,
    },

    /// Invalid key format or data.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },
}

impl SigningError {
    /// Creates a new `EncodingError`.
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    /// Creates a new `DecodingError`.
    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClaims` error.
    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    /// Creates a new `KeyGenerationError`.
    #[must_use]
    pub fn key_generation_error(message: impl Into<String>) -> Self {
        Self::KeyGenerationError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Returns `true` if the token itself was rejected (as opposed to a key problem).
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::Expired
                | Self::InvalidSignature
                | Self::InvalidClaims { .. }
                | Self::DecodingError { .. }
        )
    }
}

impl From<jsonwebtoken::errors::Error> for SigningError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => Self::invalid_key(err.to_string()),
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

impl From<SigningError> for AuthError {
    fn from(err: SigningError) -> Self {
        if err.is_validation_error() {
            AuthError::no_credentials(err.to_string())
        } else {
            AuthError::internal(err.to_string())
        }
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    RS256,
    RS384,
    ES384,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Returns the algorithm name as used in JWK/JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    /// Returns `true` if this is an RSA-based algorithm.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "ES384" => Ok(Self::ES384),
            other => Err(SigningError::invalid_key(format!(
                "unsupported signing algorithm '{other}'"
            ))),
        }
    }
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set published for downstream verifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

/// Public half of a signing key in JWK form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC").
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Key use ("sig" for signing).
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    /// RSA modulus (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

// ============================================================================
// Signing Key Pair
// ============================================================================

/// A signing key pair.
pub struct SigningKeyPair {
    /// Key ID written to the JWT header.
    pub kid: String,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_data: PublicKeyData,

    /// When the key was created or loaded.
    pub created_at: OffsetDateTime,
}

enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

impl SigningKeyPair {
    /// Generates a new 2048-bit RSA key pair.
    ///
    /// # Errors
    /// Returns an error if key generation fails or algorithm is not RSA-based.
    pub fn generate_rsa(algorithm: SigningAlgorithm) -> Result<Self, SigningError> {
        if !algorithm.is_rsa() {
            return Err(SigningError::invalid_key(format!(
                "Algorithm {} is not RSA-based",
                algorithm
            )));
        }

        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| SigningError::key_generation_error(e.to_string()))?;
        let public_key = private_key.to_public_key();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| SigningError::key_generation_error(e.to_string()))?;
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SigningError::key_generation_error(e.to_string()))?;

        let mut pair = Self::from_rsa_pem(algorithm, private_pem.as_bytes(), &public_pem)
            .map_err(|e| SigningError::key_generation_error(e.to_string()))?;
        pair.kid = uuid::Uuid::new_v4().to_string();
        Ok(pair)
    }

    /// Generates a new EC key pair on the P-384 curve.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn generate_ec() -> Result<Self, SigningError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        let mut pair = Self::from_ec_secret(&secret_key)
            .map_err(|e| SigningError::key_generation_error(e.to_string()))?;
        pair.kid = uuid::Uuid::new_v4().to_string();
        Ok(pair)
    }

    /// Loads a key pair from PEM strings.
    ///
    /// EC private keys may be PKCS#8 or SEC1 encoded; the public key is derived
    /// from the private key and `public_pem` is ignored for them.
    ///
    /// # Errors
    /// Returns an error if the PEM data is invalid.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
        public_pem: &str,
    ) -> Result<Self, SigningError> {
        let mut pair = if algorithm.is_rsa() {
            Self::from_rsa_pem(algorithm, private_pem.as_bytes(), public_pem)?
        } else {
            let secret_key = EcSecretKey::from_pkcs8_pem(private_pem)
                .or_else(|_| EcSecretKey::from_sec1_pem(private_pem))
                .map_err(|e| SigningError::invalid_key(e.to_string()))?;
            Self::from_ec_secret(&secret_key)?
        };
        pair.kid = kid.into();
        Ok(pair)
    }

    /// Builds the key pair described by the signing configuration.
    ///
    /// Without configured PEM paths a fresh key pair is generated, which means
    /// tokens do not survive a restart.
    ///
    /// # Errors
    /// Returns an error if a key file cannot be read or parsed.
    pub fn from_config(config: &SigningConfig) -> Result<Self, SigningError> {
        let algorithm: SigningAlgorithm = config.algorithm.parse()?;

        let mut pair = match (&config.private_key_path, &config.public_key_path) {
            (Some(private_path), Some(public_path)) => {
                let private_pem = std::fs::read_to_string(private_path).map_err(|e| {
                    SigningError::invalid_key(format!("{}: {e}", private_path.display()))
                })?;
                let public_pem = std::fs::read_to_string(public_path).map_err(|e| {
                    SigningError::invalid_key(format!("{}: {e}", public_path.display()))
                })?;
                Self::from_pem("", algorithm, &private_pem, &public_pem)?
            }
            _ if algorithm.is_rsa() => Self::generate_rsa(algorithm)?,
            _ => Self::generate_ec()?,
        };

        if let Some(kid) = &config.key_id {
            pair.kid = kid.clone();
        } else if pair.kid.is_empty() {
            pair.kid = uuid::Uuid::new_v4().to_string();
        }
        Ok(pair)
    }

    fn from_rsa_pem(
        algorithm: SigningAlgorithm,
        private_pem: &[u8],
        public_pem: &str,
    ) -> Result<Self, SigningError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem)
            .map_err(|e| SigningError::invalid_key(e.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| SigningError::invalid_key(e.to_string()))?;

        let public_key = RsaPublicKey::from_public_key_pem(public_pem)
            .map_err(|e| SigningError::invalid_key(e.to_string()))?;

        Ok(Self {
            kid: String::new(),
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Rsa {
                n: public_key.n().to_bytes_be(),
                e: public_key.e().to_bytes_be(),
            },
            created_at: OffsetDateTime::now_utc(),
        })
    }

    fn from_ec_secret(secret_key: &EcSecretKey) -> Result<Self, SigningError> {
        let signing_key = EcSigningKey::from(secret_key);
        let point = signing_key.verifying_key().to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| SigningError::invalid_key("Missing x coordinate"))?;
        let y = point
            .y()
            .ok_or_else(|| SigningError::invalid_key("Missing y coordinate"))?;

        // jsonwebtoken only accepts PKCS#8 for EC private keys
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| SigningError::invalid_key(e.to_string()))?;
        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| SigningError::invalid_key(e.to_string()))?;

        let x_b64 = URL_SAFE_NO_PAD.encode(x.as_slice());
        let y_b64 = URL_SAFE_NO_PAD.encode(y.as_slice());
        let decoding_key = DecodingKey::from_ec_components(&x_b64, &y_b64)
            .map_err(|e| SigningError::invalid_key(e.to_string()))?;

        Ok(Self {
            kid: String::new(),
            algorithm: SigningAlgorithm::ES384,
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Ec {
                x: x.to_vec(),
                y: y.to_vec(),
            },
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Exports the public key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        match &self.public_key_data {
            PublicKeyData::Rsa { n, e } => Jwk {
                kty: "RSA".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                crv: None,
                x: None,
                y: None,
            },
            PublicKeyData::Ec { x, y } => Jwk {
                kty: "EC".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: None,
                e: None,
                crv: Some("P-384".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
            },
        }
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Token Signer
// ============================================================================

/// Encodes and verifies compact tokens with one key pair.
///
/// Audience checks are left to the caller: a token is only valid once every
/// source in its audience has accepted it.
#[derive(Debug)]
pub struct TokenSigner {
    signing_key: SigningKeyPair,
    issuer: String,
    leeway: Duration,
}

impl TokenSigner {
    /// Creates a signer that stamps and expects `issuer` in the `iss` claim.
    #[must_use]
    pub fn new(signing_key: SigningKeyPair, issuer: impl Into<String>) -> Self {
        Self {
            signing_key,
            issuer: issuer.into(),
            leeway: Duration::from_secs(60),
        }
    }

    /// Sets the clock skew tolerated when checking `exp`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Encodes claims into a compact token.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, SigningError> {
        let mut header = Header::new(self.signing_key.algorithm.to_jwt_algorithm());
        header.kid = Some(self.signing_key.kid.clone());

        encode(&header, claims, &self.signing_key.encoding_key)
            .map_err(|e| SigningError::encoding_error(e.to_string()))
    }

    /// Verifies signature, issuer and expiry, then deserializes the claims.
    ///
    /// # Errors
    /// Returns an error if decoding or validation fails.
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<T, SigningError> {
        let mut validation = Validation::new(self.signing_key.algorithm.to_jwt_algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.leeway = self.leeway.as_secs();

        decode::<T>(token, &self.signing_key.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(SigningError::from)
    }

    /// Returns the system ID stamped into tokens.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the JWKS containing the public key.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: vec![self.signing_key.to_jwk()],
        }
    }
}
