//! Error classification as seen by wizard code.

use inbox_pkce::auth::pkce::{generate_verifier_with_len, CodeVerifier};
use inbox_pkce::error::USER_FACING_MESSAGE;
use inbox_pkce::{FlowError, PkceError};
use pretty_assertions::assert_eq;

fn all_flow_errors() -> Vec<FlowError> {
    vec![
        FlowError::expired("k"),
        FlowError::state_mismatch("k"),
        FlowError::missing_code("k"),
        FlowError::denied("k", "access_denied"),
        FlowError::exchange("k", "invalid_grant"),
    ]
}

#[test]
fn test_user_message_is_generic_for_every_variant() {
    for err in all_flow_errors() {
        assert_eq!(err.user_message(), USER_FACING_MESSAGE);
        assert_eq!(err.key(), "k");
    }
}

#[test]
fn test_only_state_mismatch_is_security_related() {
    let flagged: Vec<&str> = all_flow_errors()
        .iter()
        .filter(|e| e.is_security_related())
        .map(FlowError::kind)
        .collect();
    assert_eq!(flagged, vec!["state_mismatch"]);
}

#[test]
fn test_retryable_kinds() {
    let retryable: Vec<&str> = all_flow_errors()
        .iter()
        .filter(|e| e.is_retryable())
        .map(FlowError::kind)
        .collect();
    assert_eq!(retryable, vec!["expired", "denied", "exchange"]);
}

#[test]
fn test_pkce_error_never_echoes_verifier() {
    let bad = "short-but-secret";
    let err = CodeVerifier::parse(bad).unwrap_err();
    assert!(matches!(err, PkceError::InvalidVerifier { len: 16 }));
    assert!(!err.to_string().contains(bad));
}

#[test]
fn test_invalid_entropy_length() {
    let err = generate_verifier_with_len(8).unwrap_err();
    assert!(matches!(err, PkceError::InvalidEntropyLength { bytes: 8 }));
}

#[test]
fn test_flow_error_is_std_error() {
    let wrapped = anyhow::Error::new(FlowError::expired("k"));
    assert!(format!("{wrapped}").contains("no valid PKCE record"));
}
