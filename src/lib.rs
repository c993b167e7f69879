//! Inbox PKCE - OAuth 2.0 PKCE parameter lifecycle for channel-connection wizards.
//!
//! Generates verifiers, challenges, and state tokens, keeps them in
//! namespaced ephemeral storage across the provider redirect, and validates
//! the callback before the verifier is released for the token exchange.
//!
//! See [`auth`] for the flow overview.

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;

// Re-export core types for convenient access
pub use auth::{FlowContext, FlowStart, ParameterStore, PkceFlow};
pub use config::PkceConfig;
pub use error::{FlowError, FlowResult, PkceError};
