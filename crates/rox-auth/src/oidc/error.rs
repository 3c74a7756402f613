//! Errors raised while talking to an OpenID provider.

use crate::error::AuthError;

/// Discovery, key set and endpoint failures.
#[derive(Debug, thiserror::Error)]
pub enum OidcClientError {
    /// The request could not be sent or the response not read.
    #[error("Network error: {0}")]
    Network(String),

    /// The endpoint answered with a non-success status.
    #[error("HTTP error: status {status}")]
    Http {
        /// HTTP status code.
        status: u16,
    },

    /// A response body was not the expected JSON document.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The issuer is not a usable URL.
    #[error("Invalid issuer URL: {0}")]
    InvalidIssuer(String),

    /// The URL scheme is not allowed.
    #[error("Invalid URL scheme {0:?}: only https is allowed")]
    InvalidScheme(String),

    /// The discovery document names a different issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Issuer the document was fetched for.
        expected: String,
        /// Issuer named by the document.
        actual: String,
    },

    /// The provider metadata lacks an endpoint the flow needs.
    #[error("Provider metadata has no {0}")]
    MissingEndpoint(&'static str),

    /// No key in the provider's key set matches the token.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The provider's key set contains no usable signing key.
    #[error("No signing keys found in JWKS")]
    NoSigningKeys,

    /// The token failed signature or claim validation.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The token endpoint returned an OAuth error.
    #[error("Token endpoint returned {error:?}: {description}")]
    OAuth {
        /// OAuth error code.
        error: String,
        /// Optional human-readable description.
        description: String,
    },
}

impl OidcClientError {
    /// Returns `true` for failures caused by the presented token itself.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidToken(_) | Self::KeyNotFound(_) | Self::NoSigningKeys
        )
    }
}

impl From<reqwest::Error> for OidcClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for OidcClientError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::InvalidToken(err.to_string())
    }
}

impl From<OidcClientError> for AuthError {
    fn from(err: OidcClientError) -> Self {
        match err {
            OidcClientError::InvalidIssuer(_) | OidcClientError::InvalidScheme(_) => {
                AuthError::invalid_args(err.to_string())
            }
            e if e.is_token_error() => AuthError::no_credentials(e.to_string()),
            e => AuthError::internal(e.to_string()),
        }
    }
}
