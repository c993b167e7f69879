//! Configuration for the PKCE parameter store.
//!
//! Hosts can configure the store in code or from a TOML file. Durations use
//! humantime syntax.
//!
//! # Example
//!
//! ```toml
//! ttl = "10m"
//! namespace = "oauth_pkce::"
//! verifier_bytes = 32
//! sweep_interval = "60s"
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::auth::pkce::{VERIFIER_DEFAULT_BYTES, VERIFIER_MAX_BYTES, VERIFIER_MIN_BYTES};
use crate::auth::store::{DEFAULT_NAMESPACE, DEFAULT_TTL};

/// Default interval for the background expiry sweeper.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Errors that can occur when parsing or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A duration string could not be parsed.
    #[error("invalid duration for '{field}': {source}")]
    InvalidDuration {
        /// The offending field.
        field: &'static str,
        /// Parser error.
        #[source]
        source: humantime::DurationError,
    },

    /// A field is present but its value is not acceptable.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Settings for generating and storing PKCE parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceConfig {
    /// How long a stored record stays valid.
    pub ttl: Duration,
    /// Prefix on every storage key this crate writes.
    pub namespace: String,
    /// Random bytes per verifier (32..=96).
    pub verifier_bytes: usize,
    /// Interval of the optional background sweeper.
    pub sweep_interval: Duration,
}

impl Default for PkceConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            namespace: DEFAULT_NAMESPACE.to_string(),
            verifier_bytes: VERIFIER_DEFAULT_BYTES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Raw TOML structure for deserialization.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    ttl: Option<String>,
    namespace: Option<String>,
    verifier_bytes: Option<usize>,
    sweep_interval: Option<String>,
}

impl PkceConfig {
    /// Parses a TOML document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML, unparseable durations, or values
    /// that fail [`validate`](Self::validate).
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(input)?;
        let defaults = Self::default();

        let config = Self {
            ttl: parse_duration("ttl", raw.ttl)?.unwrap_or(defaults.ttl),
            namespace: raw.namespace.unwrap_or(defaults.namespace),
            verifier_bytes: raw.verifier_bytes.unwrap_or(defaults.verifier_bytes),
            sweep_interval: parse_duration("sweep_interval", raw.sweep_interval)?
                .unwrap_or(defaults.sweep_interval),
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read PKCE config {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid PKCE config {}", path.display()))
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a zero TTL or sweep
    /// interval, an empty namespace, or verifier entropy outside 32..=96.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "ttl",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.namespace.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "namespace",
                reason: "must not be empty; clear_all would match every key".to_string(),
            });
        }
        if !(VERIFIER_MIN_BYTES..=VERIFIER_MAX_BYTES).contains(&self.verifier_bytes) {
            return Err(ConfigError::InvalidValue {
                field: "verifier_bytes",
                reason: format!(
                    "{} is outside {VERIFIER_MIN_BYTES}..={VERIFIER_MAX_BYTES}",
                    self.verifier_bytes
                ),
            });
        }
        Ok(())
    }
}

fn parse_duration(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<Duration>, ConfigError> {
    value
        .map(|v| {
            humantime::parse_duration(&v)
                .map_err(|source| ConfigError::InvalidDuration { field, source })
        })
        .transpose()
}
