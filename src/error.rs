//! Error types for inbox-pkce.
//!
//! Errors come in two layers:
//!
//! - [`PkceError`] covers primitive failures: the OS entropy source, malformed
//!   verifiers, and storage writes. Only these propagate as hard failures.
//! - [`FlowError`] is the outcome of completing an authorization-code flow.
//!   Every variant maps to the same generic user-facing message, and callers
//!   branch on the category methods instead of the message text.
//!
//! # Example
//!
//! ```
//! use inbox_pkce::error::FlowError;
//!
//! let err = FlowError::state_mismatch("whatsapp cloud flow");
//! assert!(err.is_security_related());
//! assert!(!err.is_retryable());
//! assert_eq!(err.user_message(), "Authorization failed, please try again.");
//! ```

use std::fmt;

use thiserror::Error;

use crate::auth::storage::StorageError;

/// Result type alias using [`FlowError`].
pub type FlowResult<T> = Result<T, FlowError>;

/// Message shown to end users for every flow failure.
pub const USER_FACING_MESSAGE: &str = "Authorization failed, please try again.";

/// Failures of the PKCE primitives and the parameter store's write path.
#[derive(Debug, Error)]
pub enum PkceError {
    /// The OS random source could not produce bytes. No fallback RNG is tried.
    #[error("secure random source unavailable: {0}")]
    EntropyUnavailable(#[source] rand::Error),

    /// A verifier failed the RFC 7636 length/charset check.
    #[error("code verifier rejected ({len} chars)")]
    InvalidVerifier {
        /// Length of the rejected value. The value itself is never included.
        len: usize,
    },

    /// Requested verifier entropy is outside 32..=96 bytes.
    #[error("verifier entropy of {bytes} bytes is outside 32..=96")]
    InvalidEntropyLength {
        /// The requested byte count.
        bytes: usize,
    },

    /// The storage backend refused a write.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A record could not be serialized.
    #[error("failed to serialize PKCE record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outcome of a failed `complete`/`finish` on a flow.
#[derive(Debug)]
pub enum FlowError {
    /// No live record for the key: never started, already consumed, corrupted,
    /// tampered, or past its expiry.
    Expired {
        /// The flow key.
        key: String,
    },

    /// The returned `state` did not match the stored one.
    StateMismatch {
        /// The flow key.
        key: String,
    },

    /// The callback carried no authorization code.
    MissingCode {
        /// The flow key.
        key: String,
    },

    /// The authorization server reported an error instead of a code.
    Denied {
        /// The flow key.
        key: String,
        /// The `error`/`error_description` value from the callback.
        reason: String,
    },

    /// The caller's token exchange failed.
    Exchange {
        /// The flow key.
        key: String,
        /// Description of the failure.
        message: String,
    },
}

impl FlowError {
    /// Creates an expired/not-found error.
    #[must_use]
    pub fn expired(key: impl Into<String>) -> Self {
        Self::Expired { key: key.into() }
    }

    /// Creates a state mismatch error.
    #[must_use]
    pub fn state_mismatch(key: impl Into<String>) -> Self {
        Self::StateMismatch { key: key.into() }
    }

    /// Creates a missing-code error.
    #[must_use]
    pub fn missing_code(key: impl Into<String>) -> Self {
        Self::MissingCode { key: key.into() }
    }

    /// Creates an authorization-denied error.
    #[must_use]
    pub fn denied(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Denied {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Creates a token exchange error.
    #[must_use]
    pub fn exchange(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Exchange {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns the flow key the error belongs to.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Expired { key }
            | Self::StateMismatch { key }
            | Self::MissingCode { key }
            | Self::Denied { key, .. }
            | Self::Exchange { key, .. } => key,
        }
    }

    /// Returns `true` if the error should be monitored as a security event.
    #[must_use]
    pub fn is_security_related(&self) -> bool {
        matches!(self, Self::StateMismatch { .. })
    }

    /// Returns `true` if restarting the flow is the expected remedy.
    ///
    /// A state mismatch is not retryable: the callback itself is suspect.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Expired { .. } | Self::Denied { .. } | Self::Exchange { .. }
        )
    }

    /// Returns a short machine-readable label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Expired { .. } => "expired",
            Self::StateMismatch { .. } => "state_mismatch",
            Self::MissingCode { .. } => "missing_code",
            Self::Denied { .. } => "denied",
            Self::Exchange { .. } => "exchange",
        }
    }

    /// Returns the message to show the end user.
    ///
    /// Identical for every variant; the classification stays internal.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        USER_FACING_MESSAGE
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expired { key } => {
                write!(f, "flow '{}': no valid PKCE record (expired or missing)", key)
            }
            Self::StateMismatch { key } => {
                write!(f, "flow '{}': state parameter mismatch", key)
            }
            Self::MissingCode { key } => {
                write!(f, "flow '{}': callback carried no authorization code", key)
            }
            Self::Denied { key, reason } => {
                write!(f, "flow '{}': authorization denied: {}", key, reason)
            }
            Self::Exchange { key, message } => {
                write!(f, "flow '{}': token exchange failed: {}", key, message)
            }
        }
    }
}

impl std::error::Error for FlowError {}
