//! OAuth 2.0 Authorization Code + PKCE support for channel-connection wizards.
//!
//! The wizard that connects a messaging channel (WhatsApp Cloud, a Facebook
//! Page, ...) leaves the application for the provider's consent screen and
//! comes back through a full-page redirect. Everything that must survive that
//! round trip lives here.
//!
//! # Architecture
//!
//! ```text
//! begin(key, context)
//!     ↓
//! generate verifier ──→ derive challenge ──→ authorization URL
//!     ↓
//! store {verifier, state, expires_at, context} under namespace + key
//!     ↓
//! ── redirect to provider, user consents, redirect back ──
//!     ↓
//! complete(key, code, state)
//!     ├─ no live record          → FlowError::Expired
//!     ├─ state differs           → FlowError::StateMismatch (security log)
//!     └─ ok                      → verifier handed to the caller's token exchange
//!                                  → record deleted after exchange
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use inbox_pkce::auth::flow::PkceFlow;
//! use inbox_pkce::auth::storage::MemoryStorage;
//! use inbox_pkce::auth::store::ParameterStore;
//! use inbox_pkce::auth::FlowContext;
//!
//! let store = ParameterStore::new(Arc::new(MemoryStorage::new()));
//! let flow = PkceFlow::new(store);
//!
//! let start = flow
//!     .begin("whatsapp cloud flow", FlowContext::new("whatsapp_cloud"))
//!     .expect("OS entropy available");
//!
//! // ... redirect, provider calls back with `code` and the same `state` ...
//! let done = flow
//!     .complete("whatsapp cloud flow", "auth-code", start.state())
//!     .expect("state matches");
//! assert_eq!(done.code_verifier(), start.code_verifier());
//! flow.cancel("whatsapp cloud flow");
//! ```

pub mod callback;
pub mod flow;
pub mod pkce;
pub mod state;
pub mod storage;
pub mod store;
pub mod sweeper;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use self::flow::{CompletedFlow, FlowStart, PkceFlow};
pub use self::pkce::{CodeChallenge, CodeVerifier, PkceChallenge};
pub use self::storage::{FileStorage, MemoryStorage, SessionStorage, StorageError};
pub use self::store::{ParameterStore, PkceParams, PkceRecord};

/// Structured resume data for a wizard interrupted by the redirect.
///
/// Stored next to the state in the parameter record. The `state` sent to the
/// provider stays an opaque token, so nothing here has to survive being
/// split back out of a string: names may contain any character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowContext {
    /// Integration type the flow belongs to (e.g. `whatsapp_cloud`).
    pub integration: String,

    /// Account the new inbox is created under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// Human-entered inbox name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// When the flow started, ms since the Unix epoch.
    #[serde(default)]
    pub created_at: u64,

    /// Anything else the wizard wants back.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl FlowContext {
    /// Creates a context for an integration, stamped with the current time.
    #[must_use]
    pub fn new(integration: impl Into<String>) -> Self {
        Self {
            integration: integration.into(),
            account_id: None,
            display_name: None,
            created_at: now_ms(),
            extra: Map::new(),
        }
    }

    /// Sets the account identifier.
    #[must_use]
    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    /// Sets the human-entered display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Adds an extra field.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Current wall-clock time in ms since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
