//! OAuth `state` parameter for CSRF protection (RFC 6749 Section 10.12).
//!
//! The state is an opaque random token. It carries no flow context; that
//! lives in the stored record's [`FlowContext`](super::FlowContext).

use subtle::ConstantTimeEq;

use super::pkce::random_base64url;
use crate::error::PkceError;

/// Length of the state parameter in bytes (before base64 encoding).
///
/// 32 bytes provides 256 bits of entropy.
const STATE_LENGTH: usize = 32;

/// Generates a random state token (43 base64url chars).
///
/// # Errors
///
/// Returns [`PkceError::EntropyUnavailable`] if the OS random source fails.
pub fn generate_state() -> Result<String, PkceError> {
    random_base64url(STATE_LENGTH)
}

/// Byte-for-byte comparison of a stored and a returned state.
#[must_use]
pub fn states_match(expected: &str, received: &str) -> bool {
    expected.as_bytes().ct_eq(received.as_bytes()).into()
}
