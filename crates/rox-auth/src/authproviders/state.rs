//! OAuth `state` parameter helpers.
//!
//! The state sent to an identity provider is `"<providerID>:<clientState>"`.
//! The client state may itself carry the test-login marker, in which case the
//! login result is returned to the test UI page instead of being persisted.

/// Marker prepended to the client state of a test login.
pub const TEST_LOGIN_CLIENT_STATE: &str = "e003ba41-9cc1-48ee-b6a9-2dd7c21da92e";

const TEST_LOGIN_SEPARATOR: char = '#';

/// Joins a provider ID and a client state into an OAuth state value.
#[must_use]
pub fn make_state(provider_id: &str, client_state: &str) -> String {
    format!("{provider_id}:{client_state}")
}

/// Splits an OAuth state into provider ID and client state at the first colon.
///
/// A state without a colon is treated as a bare provider ID.
#[must_use]
pub fn split_state(state: &str) -> (&str, &str) {
    state.split_once(':').unwrap_or((state, ""))
}

/// Prefixes the client state with the test-login marker when `test_mode` is set.
#[must_use]
pub fn attach_test_state_or_empty(client_state: &str, test_mode: bool) -> String {
    if test_mode {
        format!("{TEST_LOGIN_CLIENT_STATE}{TEST_LOGIN_SEPARATOR}{client_state}")
    } else {
        client_state.to_string()
    }
}

/// Strips the test-login marker, returning the inner client state and whether
/// the marker was present.
#[must_use]
pub fn parse_client_state(client_state: &str) -> (&str, bool) {
    match client_state.strip_prefix(TEST_LOGIN_CLIENT_STATE) {
        Some(rest) => (rest.strip_prefix(TEST_LOGIN_SEPARATOR).unwrap_or(rest), true),
        None => (client_state, false),
    }
}
