//! Selection of the OAuth response mode and response type for a provider.
//!
//! The choice depends on what the provider advertises and on whether a client
//! secret is available to redeem authorization codes.

use std::fmt;

use super::discovery::ProviderMetadata;
use crate::error::{AuthError, AuthResult};

/// How the provider delivers the authorization response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    FormPost,
    Query,
    Fragment,
}

impl ResponseMode {
    /// Protocol name (`response_mode` parameter).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FormPost => "form_post",
            Self::Query => "query",
            Self::Fragment => "fragment",
        }
    }

    /// Value stored back into the provider config under `mode`.
    #[must_use]
    pub fn config_value(self) -> &'static str {
        match self {
            Self::FormPost => "post",
            Self::Query => "query",
            Self::Fragment => "fragment",
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `mode` an administrator configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfiguredMode {
    Fixed(ResponseMode),
    Auto,
}

impl ConfiguredMode {
    /// Parses the `mode` config value. Empty means the legacy fragment mode.
    ///
    /// # Errors
    /// `InvalidArgs` for an unknown mode.
    pub fn parse(value: &str) -> AuthResult<Self> {
        match value {
            "" | "fragment" => Ok(Self::Fixed(ResponseMode::Fragment)),
            "post" | "form_post" => Ok(Self::Fixed(ResponseMode::FormPost)),
            "query" => Ok(Self::Fixed(ResponseMode::Query)),
            "auto" => Ok(Self::Auto),
            other => Err(AuthError::invalid_args(format!(
                "invalid response mode {other:?}"
            ))),
        }
    }
}

/// A space-separated OAuth response type, e.g. `code id_token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseType(String);

impl ResponseType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn has(&self, part: &str) -> bool {
        self.0.split_whitespace().any(|p| p == part)
    }

    #[must_use]
    pub fn has_code(&self) -> bool {
        self.has("code")
    }

    #[must_use]
    pub fn has_id_token(&self) -> bool {
        self.has("id_token")
    }

    #[must_use]
    pub fn has_token(&self) -> bool {
        self.has("token")
    }

    /// Whether a login with this type must carry a nonce.
    #[must_use]
    pub fn needs_nonce(&self) -> bool {
        self.has_code() || self.has_id_token()
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const HYBRID_TYPES: [&str; 4] = [
    "code id_token token",
    "code token id_token",
    "code token",
    "code id_token",
];

// Some providers only list "token id_token"; both orders are tried.
const IMPLICIT_TYPES: [&str; 4] = ["id_token token", "token id_token", "token", "id_token"];

fn supports_code(metadata: &ProviderMetadata) -> bool {
    metadata.response_types_supported.iter().any(|t| t == "code")
}

/// Picks the response mode for `auto` configurations.
///
/// # Errors
/// `InvalidArgs` when the provider supports none of the candidate modes.
pub fn select_response_mode(metadata: &ProviderMetadata, has_secret: bool) -> AuthResult<ResponseMode> {
    let preference = if has_secret && supports_code(metadata) {
        [ResponseMode::FormPost, ResponseMode::Query, ResponseMode::Fragment]
    } else {
        [ResponseMode::FormPost, ResponseMode::Fragment, ResponseMode::Query]
    };

    let Some(supported) = &metadata.response_modes_supported else {
        return Ok(preference[0]);
    };

    preference
        .into_iter()
        .find(|mode| supported.iter().any(|s| s == mode.as_str()))
        .ok_or_else(|| {
            AuthError::invalid_args(format!(
                "identity provider supports none of the response modes {:?}",
                preference.map(ResponseMode::as_str)
            ))
        })
}

/// Picks the response type for an already chosen mode.
///
/// # Errors
/// `InvalidArgs` for query mode without a secret, or when no candidate type
/// is advertised by the provider.
pub fn select_response_type(
    mode: ResponseMode,
    metadata: &ProviderMetadata,
    has_secret: bool,
) -> AuthResult<ResponseType> {
    if mode == ResponseMode::Query && !has_secret {
        return Err(AuthError::invalid_args(
            "query response mode requires a client secret",
        ));
    }

    let mut preference: Vec<&str> = Vec::new();
    if has_secret && mode != ResponseMode::Fragment {
        preference.push("code");
    }
    if has_secret && mode == ResponseMode::FormPost {
        preference.extend(HYBRID_TYPES);
    }
    if mode != ResponseMode::Query {
        preference.extend(IMPLICIT_TYPES);
    }

    preference
        .iter()
        .find(|candidate| {
            metadata
                .response_types_supported
                .iter()
                .any(|t| t == *candidate)
        })
        .map(|t| ResponseType((*t).to_string()))
        .ok_or_else(|| {
            AuthError::invalid_args(format!(
                "identity provider supports none of the response types {preference:?} for response mode {mode}"
            ))
        })
}

/// Resolves the configured mode into a concrete `(mode, type)` pair.
///
/// # Errors
/// See [`select_response_mode`] and [`select_response_type`].
pub fn negotiate(
    configured: ConfiguredMode,
    metadata: &ProviderMetadata,
    has_secret: bool,
) -> AuthResult<(ResponseMode, ResponseType)> {
    let mode = match configured {
        ConfiguredMode::Fixed(mode) => mode,
        ConfiguredMode::Auto => select_response_mode(metadata, has_secret)?,
    };
    let response_type = select_response_type(mode, metadata, has_secret)?;
    Ok((mode, response_type))
}
