//! Issuer lookup for exchanger selection.
//!
//! Nothing here verifies signatures. The issuer only picks which exchanger
//! gets to verify the token.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};

use crate::error::{AuthError, AuthResult};

/// Issuer assigned to legacy opaque Kubernetes service account tokens.
pub const LEGACY_KUBE_ISSUER: &str = "kubernetes/serviceaccount";

const OPAQUE_TOKEN_PREFIX: &str = "sha256~";

/// Decodes the payload of a compact JWT without verifying it.
///
/// # Errors
/// Returns `InvalidArgs` if the token is not a structurally valid JWT.
pub fn unverified_claims(raw: &str) -> AuthResult<Map<String, Value>> {
    jsonwebtoken::decode_header(raw)
        .map_err(|e| AuthError::invalid_args(format!("malformed token header: {e}")))?;

    let mut parts = raw.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::invalid_args("token must have three segments"));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::invalid_args(format!("malformed token payload: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::invalid_args(format!("token payload is not a JSON object: {e}")))
}

/// Returns the issuer a raw ID token claims to come from.
///
/// Expiry and other claims are ignored.
///
/// # Errors
/// Returns `InvalidArgs` for a malformed token or one without an `iss` claim.
pub fn issuer_from_raw_id_token(raw: &str) -> AuthResult<String> {
    if raw.starts_with(OPAQUE_TOKEN_PREFIX) {
        return Ok(LEGACY_KUBE_ISSUER.to_string());
    }
    let claims = unverified_claims(raw)?;
    match claims.get("iss").and_then(Value::as_str) {
        Some(iss) if !iss.is_empty() => Ok(iss.to_string()),
        _ => Err(AuthError::invalid_args("token has no issuer claim")),
    }
}

#[cfg(test)]
pub(crate) fn unsigned_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2ln")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_opaque_kube_token() {
        assert_eq!(
            issuer_from_raw_id_token("sha256~abcdef").unwrap(),
            LEGACY_KUBE_ISSUER
        );
    }

    #[test]
    fn test_expired_token_still_yields_issuer() {
        let raw = unsigned_token(&json!({"iss": "https://issuer.example", "exp": 1}));
        assert_eq!(
            issuer_from_raw_id_token(&raw).unwrap(),
            "https://issuer.example"
        );
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        for raw in ["", "not-a-jwt", "a.b", "a.b.c.d"] {
            let err = issuer_from_raw_id_token(raw).unwrap_err();
            assert!(err.is_invalid_args(), "{raw}");
        }
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#);
        let err = issuer_from_raw_id_token(&format!("{header}.!!!.sig")).unwrap_err();
        assert!(err.is_invalid_args());
    }

    #[test]
    fn test_missing_issuer_rejected() {
        let raw = unsigned_token(&json!({"sub": "x"}));
        assert!(issuer_from_raw_id_token(&raw).unwrap_err().is_invalid_args());
    }
}
