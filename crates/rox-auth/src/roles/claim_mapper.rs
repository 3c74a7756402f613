//! Flattening of identity-provider claims into role-mapping attributes.
//!
//! Top-level scalars and arrays of scalars become `name -> [values]`. Objects
//! are flattened one level deep into dotted keys (`realm_access.roles`).
//! Anything nested further is dropped unless the caller asks for full depth,
//! which the Kubernetes extractor does for the `kubernetes.io` claim.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Flattened attributes: attribute name to all of its string values.
pub type ClaimAttributes = HashMap<String, Vec<String>>;

/// Flattens a claim set with one level of object nesting.
#[must_use]
pub fn flatten_claims(claims: &Map<String, Value>) -> ClaimAttributes {
    let mut out = ClaimAttributes::new();
    for (key, value) in claims {
        flatten_into(&mut out, key, value, 1);
    }
    out
}

/// Flattens a single claim, descending into objects up to `depth` levels.
pub fn flatten_claim_into(out: &mut ClaimAttributes, key: &str, value: &Value, depth: usize) {
    flatten_into(out, key, value, depth);
}

fn flatten_into(out: &mut ClaimAttributes, key: &str, value: &Value, depth: usize) {
    match value {
        Value::Object(map) => {
            if depth == 0 {
                return;
            }
            for (child_key, child) in map {
                flatten_into(out, &format!("{key}.{child_key}"), child, depth - 1);
            }
        }
        Value::Array(items) => {
            let values: Vec<String> = items.iter().filter_map(scalar_to_string).collect();
            if !values.is_empty() {
                out.entry(key.to_string()).or_default().extend(values);
            }
        }
        other => {
            if let Some(s) = scalar_to_string(other) {
                out.entry(key.to_string()).or_default().push(s);
            }
        }
    }
}

/// Renders a scalar claim value as a string. Objects, arrays and null yield `None`.
#[must_use]
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Copies mapped claims into attributes under their configured names.
///
/// `mappings` maps a claim path (as produced by [`flatten_claims`]) to the
/// attribute name it should appear under.
pub fn apply_claim_mappings(
    flattened: &ClaimAttributes,
    mappings: &HashMap<String, String>,
    attributes: &mut ClaimAttributes,
) {
    for (claim_path, attribute) in mappings {
        if let Some(values) = flattened.get(claim_path) {
            attributes
                .entry(attribute.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }
}
