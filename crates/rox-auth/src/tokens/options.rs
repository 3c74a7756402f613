//! Layered options applied while assembling a token.

use std::time::Duration;

use time::OffsetDateTime;

/// An option contributed by the call site, the issuer or the factory.
///
/// Layers run in ascending priority (call site, issuer, factory). Once an
/// expiry is set, later layers may only move it earlier.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenOption {
    /// Expire `ttl` after issuance.
    Ttl(Duration),
    /// Expire at a fixed point in time.
    Expiry(OffsetDateTime),
    /// Expire `ttl` after issuance unless an earlier layer set an expiry.
    DefaultTtl(Duration),
    /// Add a passthrough value to the `extra` map unless already present.
    Extra(String, serde_json::Value),
}

/// Mutable state threaded through the option layers.
#[derive(Debug, Clone)]
pub(crate) struct TokenDraft {
    pub now: OffsetDateTime,
    pub expiry: Option<OffsetDateTime>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenDraft {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now,
            expiry: None,
            extra: serde_json::Map::new(),
        }
    }

    fn shorten_to(&mut self, candidate: OffsetDateTime) {
        self.expiry = Some(match self.expiry {
            Some(current) if current <= candidate => current,
            _ => candidate,
        });
    }
}

impl TokenOption {
    pub(crate) fn apply(&self, draft: &mut TokenDraft) {
        match self {
            Self::Ttl(ttl) => {
                let candidate = draft.now + *ttl;
                draft.shorten_to(candidate);
            }
            Self::Expiry(at) => draft.shorten_to(*at),
            Self::DefaultTtl(ttl) => {
                if draft.expiry.is_none() {
                    draft.expiry = Some(draft.now + *ttl);
                }
            }
            Self::Extra(key, value) => {
                draft
                    .extra
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-01-01 00:00 UTC);

    fn run(layers: &[&[TokenOption]]) -> TokenDraft {
        let mut draft = TokenDraft::new(NOW);
        for layer in layers {
            for opt in *layer {
                opt.apply(&mut draft);
            }
        }
        draft
    }

    #[test]
    fn test_later_layer_only_shortens() {
        let call_site = [TokenOption::Ttl(Duration::from_secs(3600))];
        let issuer = [TokenOption::Ttl(Duration::from_secs(7200))];
        let draft = run(&[&call_site, &issuer]);
        assert_eq!(draft.expiry, Some(NOW + Duration::from_secs(3600)));

        let global = [TokenOption::Ttl(Duration::from_secs(60))];
        let draft = run(&[&call_site, &issuer, &global]);
        assert_eq!(draft.expiry, Some(NOW + Duration::from_secs(60)));
    }

    #[test]
    fn test_default_ttl_does_not_override() {
        let call_site = [TokenOption::Expiry(NOW + Duration::from_secs(30))];
        let global = [TokenOption::DefaultTtl(Duration::from_secs(43200))];
        let draft = run(&[&call_site, &global]);
        assert_eq!(draft.expiry, Some(NOW + Duration::from_secs(30)));

        let draft = run(&[&[], &global]);
        assert_eq!(draft.expiry, Some(NOW + Duration::from_secs(43200)));
    }

    #[test]
    fn test_no_options_leaves_expiry_unset() {
        assert!(run(&[]).expiry.is_none());
    }

    #[test]
    fn test_extra_first_layer_wins() {
        let call_site = [TokenOption::Extra("k".into(), serde_json::json!("call"))];
        let issuer = [TokenOption::Extra("k".into(), serde_json::json!("issuer"))];
        let draft = run(&[&call_site, &issuer]);
        assert_eq!(draft.extra["k"], "call");
    }
}
