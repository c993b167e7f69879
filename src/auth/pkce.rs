//! PKCE (Proof Key for Code Exchange) primitives.
//!
//! PKCE (RFC 7636) protects the authorization-code flow against code
//! interception: the client keeps a random verifier and only sends its
//! SHA-256 challenge with the authorization request.
//!
//! # Example
//!
//! ```
//! use inbox_pkce::auth::pkce::PkceChallenge;
//!
//! let pkce = PkceChallenge::generate().expect("OS entropy available");
//! assert_eq!(pkce.verifier().expose_secret().len(), 43);
//! assert_eq!(pkce.challenge().as_str().len(), 43);
//! assert_eq!(pkce.challenge_method(), "S256");
//! ```

use std::fmt;

use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::PkceError;

/// Default verifier entropy in bytes (256 bits, encodes to 43 chars).
pub const VERIFIER_DEFAULT_BYTES: usize = 32;

/// Smallest accepted entropy; encodes to the RFC 7636 minimum of 43 chars.
pub const VERIFIER_MIN_BYTES: usize = 32;

/// Largest accepted entropy; encodes to the RFC 7636 maximum of 128 chars.
pub const VERIFIER_MAX_BYTES: usize = 96;

/// The only challenge method this crate emits.
pub const CHALLENGE_METHOD: &str = "S256";

/// RFC 7636 Section 4.1: 43..=128 unreserved characters.
static VERIFIER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9\-._~]{43,128}$").unwrap());

/// A validated PKCE code verifier.
///
/// Only constructible through [`CodeVerifier::parse`] or the generator, so
/// holding one means the length/charset invariant holds. The value is kept
/// in a [`SecretString`] and redacted from `Debug`.
#[derive(Clone)]
pub struct CodeVerifier(SecretString);

impl CodeVerifier {
    /// Validates and wraps a verifier string.
    ///
    /// # Errors
    ///
    /// Returns [`PkceError::InvalidVerifier`] if the value fails
    /// [`is_valid_verifier`].
    pub fn parse(value: impl Into<String>) -> Result<Self, PkceError> {
        let value = value.into();
        if !is_valid_verifier(&value) {
            return Err(PkceError::InvalidVerifier { len: value.len() });
        }
        Ok(Self(SecretString::new(value.into())))
    }

    /// Returns the raw verifier. Only send this to the token endpoint.
    #[must_use]
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// Derives the S256 challenge for this verifier.
    #[must_use]
    pub fn challenge(&self) -> CodeChallenge {
        compute_challenge(self.expose_secret())
    }
}

impl fmt::Debug for CodeVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CodeVerifier").field(&"[REDACTED]").finish()
    }
}

impl PartialEq for CodeVerifier {
    fn eq(&self, other: &Self) -> bool {
        self.expose_secret()
            .as_bytes()
            .ct_eq(other.expose_secret().as_bytes())
            .into()
    }
}

impl Eq for CodeVerifier {}

/// A base64url (unpadded) SHA-256 code challenge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeChallenge(String);

impl CodeChallenge {
    /// Returns the challenge string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CodeChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A verifier together with its derived challenge.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    verifier: CodeVerifier,
    challenge: CodeChallenge,
}

impl PkceChallenge {
    /// Generates a fresh verifier and its challenge.
    ///
    /// # Errors
    ///
    /// Returns [`PkceError::EntropyUnavailable`] if the OS random source fails.
    pub fn generate() -> Result<Self, PkceError> {
        generate_verifier().map(Self::from_verifier)
    }

    /// Builds the pair from an existing verifier.
    #[must_use]
    pub fn from_verifier(verifier: CodeVerifier) -> Self {
        let challenge = verifier.challenge();
        Self {
            verifier,
            challenge,
        }
    }

    /// Returns the code verifier (kept by the client until token exchange).
    #[must_use]
    pub fn verifier(&self) -> &CodeVerifier {
        &self.verifier
    }

    /// Returns the code challenge (sent with the authorization request).
    #[must_use]
    pub fn challenge(&self) -> &CodeChallenge {
        &self.challenge
    }

    /// Returns the challenge method ("S256").
    #[must_use]
    pub fn challenge_method(&self) -> &'static str {
        CHALLENGE_METHOD
    }

    /// Splits the pair into its parts.
    #[must_use]
    pub fn into_parts(self) -> (CodeVerifier, CodeChallenge) {
        (self.verifier, self.challenge)
    }
}

/// Generates a verifier from 32 bytes of OS entropy.
///
/// # Errors
///
/// Returns [`PkceError::EntropyUnavailable`] if the OS random source fails.
pub fn generate_verifier() -> Result<CodeVerifier, PkceError> {
    generate_verifier_with_len(VERIFIER_DEFAULT_BYTES)
}

/// Generates a verifier from `bytes` bytes of OS entropy (32..=96).
///
/// # Errors
///
/// Returns [`PkceError::InvalidEntropyLength`] when `bytes` is out of range
/// and [`PkceError::EntropyUnavailable`] if the OS random source fails.
pub fn generate_verifier_with_len(bytes: usize) -> Result<CodeVerifier, PkceError> {
    if !(VERIFIER_MIN_BYTES..=VERIFIER_MAX_BYTES).contains(&bytes) {
        return Err(PkceError::InvalidEntropyLength { bytes });
    }
    let encoded = random_base64url(bytes)?;
    CodeVerifier::parse(encoded)
}

/// Fills `len` bytes from the OS CSPRNG and base64url encodes them.
pub(crate) fn random_base64url(len: usize) -> Result<String, PkceError> {
    let mut buf = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(PkceError::EntropyUnavailable)?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}

/// Computes `BASE64URL(SHA256(verifier))` without padding.
///
/// Accepts any string, valid verifier or not.
#[must_use]
pub fn compute_challenge(verifier: &str) -> CodeChallenge {
    let hash = Sha256::digest(verifier.as_bytes());
    CodeChallenge(URL_SAFE_NO_PAD.encode(hash))
}

/// Returns true iff `value` is 43..=128 chars of `[A-Za-z0-9-._~]`.
#[must_use]
pub fn is_valid_verifier(value: &str) -> bool {
    VERIFIER_REGEX.is_match(value)
}

/// Checks a verifier against a challenge the way an authorization server does.
#[must_use]
pub fn verify_challenge(verifier: &str, challenge: &str) -> bool {
    let computed = compute_challenge(verifier);
    computed.as_str().as_bytes().ct_eq(challenge.as_bytes()).into()
}
