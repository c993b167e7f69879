//! Property-based tests for PKCE generation and validation.
//!
//! Tests invariants:
//! - Every generated verifier passes the validator for every allowed entropy
//! - The challenge is always 43 base64url characters
//! - The validator accepts exactly the unreserved charset at 43..=128 chars
//! - Verifiers and states never collide in practice

use std::collections::HashSet;

use inbox_pkce::auth::pkce::{
    compute_challenge, generate_verifier_with_len, is_valid_verifier, verify_challenge,
    CodeVerifier, VERIFIER_MAX_BYTES, VERIFIER_MIN_BYTES,
};
use inbox_pkce::auth::state::generate_state;
use proptest::prelude::*;

fn is_base64url(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

proptest! {
    #[test]
    fn prop_generated_verifier_is_valid(bytes in VERIFIER_MIN_BYTES..=VERIFIER_MAX_BYTES) {
        let verifier = generate_verifier_with_len(bytes).unwrap();
        prop_assert!(is_valid_verifier(verifier.expose_secret()));
        prop_assert!(is_base64url(verifier.expose_secret()));
    }

    #[test]
    fn prop_challenge_shape(input in ".*") {
        let challenge = compute_challenge(&input);
        prop_assert_eq!(challenge.as_str().len(), 43);
        prop_assert!(is_base64url(challenge.as_str()));
    }

    #[test]
    fn prop_validator_accepts_unreserved(value in "[A-Za-z0-9._~-]{43,128}") {
        prop_assert!(is_valid_verifier(&value));
        prop_assert!(CodeVerifier::parse(value.clone()).is_ok());
    }

    #[test]
    fn prop_validator_rejects_short(value in "[A-Za-z0-9._~-]{0,42}") {
        prop_assert!(!is_valid_verifier(&value));
    }

    #[test]
    fn prop_validator_rejects_long(value in "[A-Za-z0-9._~-]{129,200}") {
        prop_assert!(!is_valid_verifier(&value));
    }

    #[test]
    fn prop_validator_rejects_foreign_char(
        prefix in "[A-Za-z0-9]{21}",
        suffix in "[A-Za-z0-9]{21}",
        bad in "[ +/=@#%&!\"'\\n\\t]",
    ) {
        let value = format!("{prefix}{bad}{suffix}");
        prop_assert!(!is_valid_verifier(&value));
    }

    #[test]
    fn prop_challenge_verifies_only_its_verifier(bytes in VERIFIER_MIN_BYTES..=VERIFIER_MAX_BYTES) {
        let verifier = generate_verifier_with_len(bytes).unwrap();
        let other = generate_verifier_with_len(bytes).unwrap();
        let challenge = verifier.challenge();
        prop_assert!(verify_challenge(verifier.expose_secret(), challenge.as_str()));
        prop_assert!(!verify_challenge(other.expose_secret(), challenge.as_str()));
    }
}

#[test]
fn test_states_are_unique() {
    let states: HashSet<String> = (0..1000).map(|_| generate_state().unwrap()).collect();
    assert_eq!(states.len(), 1000);
}
