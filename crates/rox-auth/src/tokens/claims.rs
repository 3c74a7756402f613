//! Claims carried by platform-issued tokens.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Normalized identity returned by any identity backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUserClaim {
    /// Stable user identifier at the identity provider.
    #[serde(default)]
    pub user_id: String,

    /// Display name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub full_name: String,

    /// E-mail address.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,

    /// Flattened attributes used for role mapping.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Vec<String>>,
}

impl ExternalUserClaim {
    /// Returns the values of one attribute, or an empty slice.
    #[must_use]
    pub fn attribute(&self, key: &str) -> &[String] {
        self.attributes.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Platform payload embedded next to the registered claims.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoxClaims {
    /// Names of the roles granted to the bearer.
    #[serde(rename = "roles", default, skip_serializing_if = "Vec::is_empty")]
    pub role_names: Vec<String>,

    /// Identity the token was issued for, when it came from an external provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_user: Option<ExternalUserClaim>,

    /// Human readable name of the token.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// Full claim set of an issued token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// System ID of the issuing platform.
    pub iss: String,

    /// Source ID the token was issued for.
    pub sub: String,

    /// Source IDs that must all accept the token.
    pub aud: Vec<String>,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Unique token ID, used for revocation.
    pub jti: String,

    #[serde(flatten)]
    pub rox: RoxClaims,

    /// Provider-specific passthrough values.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    /// Expiry as a timestamp. Out-of-range values clamp to the Unix epoch.
    #[must_use]
    pub fn expiry(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.exp).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// Returns `true` if `source_id` is one of the audiences.
    #[must_use]
    pub fn has_audience(&self, source_id: &str) -> bool {
        self.aud.iter().any(|a| a == source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_claims() -> Claims {
        Claims {
            iss: "https://stackrox.io/jwt".to_string(),
            sub: "provider-1".to_string(),
            aud: vec!["provider-1".to_string()],
            exp: 1_700_003_600,
            iat: 1_700_000_000,
            jti: "8f0c7a0e-2a52-4a3a-9d0c-1a2b3c4d5e6f".to_string(),
            rox: RoxClaims {
                role_names: vec!["Admin".to_string()],
                external_user: Some(ExternalUserClaim {
                    user_id: "u-42".to_string(),
                    full_name: "Jane Doe".to_string(),
                    email: "jane@example.com".to_string(),
                    attributes: HashMap::from([(
                        "groups".to_string(),
                        vec!["ops".to_string(), "dev".to_string()],
                    )]),
                }),
                name: String::new(),
            },
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_rox_claims_flattened_on_the_wire() {
        let json = serde_json::to_value(sample_claims()).unwrap();
        assert_eq!(json["roles"], serde_json::json!(["Admin"]));
        assert_eq!(json["external_user"]["user_id"], "u-42");
        assert!(json.get("name").is_none());
        assert!(json.get("extra").is_none());
    }

    #[test]
    fn test_claims_deserialize_without_optional_payload() {
        let json = r#"{"iss":"i","sub":"s","aud":["s"],"exp":10,"iat":1,"jti":"j"}"#;
        let claims: Claims = serde_json::from_str(json).unwrap();
        assert!(claims.rox.role_names.is_empty());
        assert!(claims.rox.external_user.is_none());
        assert!(claims.has_audience("s"));
        assert_eq!(claims.expiry().unix_timestamp(), 10);
    }

    #[test]
    fn test_attribute_lookup() {
        let claims = sample_claims();
        let user = claims.rox.external_user.as_ref().unwrap();
        assert_eq!(user.attribute("groups"), ["ops", "dev"]);
        assert!(user.attribute("missing").is_empty());
    }
}
