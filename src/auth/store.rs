//! Ephemeral PKCE parameter store.
//!
//! Holds at most one `{code_verifier, state, expires_at}` record per flow
//! key in a [`SessionStorage`], under a namespace prefix so it can purge its
//! own entries without touching anything else in the same storage.
//!
//! Expiry is enforced on every read. Each write also schedules a tokio timer
//! that deletes the entry once it lapses, but that timer is only an
//! optimization: a suspended or dropped runtime simply means the next read
//! does the cleanup instead.
//!
//! Writes and stale-entry removal are serialized per store, so a cleanup
//! timer or sweep never deletes a record stored concurrently through the
//! same `ParameterStore`. Two stores sharing one namespace get no such
//! guarantee, since `SessionStorage` has no compare-and-delete.
//!
//! Reads never fail. An absent, corrupted, expired, or tampered entry reads
//! as `None`, and everything but the absent case is deleted on the way out.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use inbox_pkce::auth::pkce::generate_verifier;
//! use inbox_pkce::auth::storage::MemoryStorage;
//! use inbox_pkce::auth::store::{ParameterStore, PkceParams};
//!
//! let store = ParameterStore::new(Arc::new(MemoryStorage::new()));
//! let params = PkceParams::new(generate_verifier().unwrap(), "opaque-state");
//!
//! store.store("facebook page flow", &params).unwrap();
//! let record = store.retrieve("facebook page flow").expect("fresh record");
//! assert_eq!(record.params(), &params);
//!
//! store.delete("facebook page flow");
//! assert!(store.retrieve("facebook page flow").is_none());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::pkce::CodeVerifier;
use super::state::states_match;
use super::storage::SessionStorage;
use super::{now_ms, FlowContext};
use crate::config::PkceConfig;
use crate::error::PkceError;

/// Default record lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Default key prefix for entries owned by this store.
pub const DEFAULT_NAMESPACE: &str = "oauth_pkce::";

/// Extra delay before the cleanup timer fires, so the record is strictly
/// past `expires_at` when it is re-read.
const CLEANUP_GRACE: Duration = Duration::from_millis(10);

/// Parameters kept for one authorization attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PkceParams {
    /// The secret verifier.
    pub code_verifier: CodeVerifier,
    /// The anti-CSRF state sent with the authorization request.
    pub state: String,
    /// Wizard resume data.
    pub context: Option<FlowContext>,
}

impl PkceParams {
    /// Creates parameters without resume context.
    #[must_use]
    pub fn new(code_verifier: CodeVerifier, state: impl Into<String>) -> Self {
        Self {
            code_verifier,
            state: state.into(),
            context: None,
        }
    }

    /// Attaches resume context.
    #[must_use]
    pub fn with_context(mut self, context: FlowContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// A live record read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct PkceRecord {
    params: PkceParams,
    expires_at: u64,
}

impl PkceRecord {
    /// Returns the stored parameters.
    #[must_use]
    pub fn params(&self) -> &PkceParams {
        &self.params
    }

    /// Returns the verifier.
    #[must_use]
    pub fn code_verifier(&self) -> &CodeVerifier {
        &self.params.code_verifier
    }

    /// Returns the stored state.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.params.state
    }

    /// Returns the resume context, if any.
    #[must_use]
    pub fn context(&self) -> Option<&FlowContext> {
        self.params.context.as_ref()
    }

    /// Returns the expiry, in ms since the Unix epoch.
    #[must_use]
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Returns true once the current time is past the expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        now_ms() > self.expires_at
    }

    /// Returns the time left before expiry, or zero.
    #[must_use]
    pub fn time_remaining(&self) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(now_ms()))
    }

    /// Consumes the record, returning its parameters.
    #[must_use]
    pub fn into_params(self) -> PkceParams {
        self.params
    }
}

/// On-disk shape of a record.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    code_verifier: String,
    state: String,
    expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<FlowContext>,
}

/// Why a stored entry was not handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Missing,
    Corrupted,
    Expired,
    Tampered,
    Backend,
}

impl Rejection {
    /// Whether the entry should be deleted.
    fn is_stale(self) -> bool {
        matches!(self, Self::Corrupted | Self::Expired | Self::Tampered)
    }
}

/// Reads and checks one entry without side effects.
fn inspect(
    storage: &dyn SessionStorage,
    storage_key: &str,
    now: u64,
) -> Result<PkceRecord, Rejection> {
    let raw = match storage.get(storage_key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Err(Rejection::Missing),
        Err(e) => {
            warn!(key = %storage_key, error = %e, "Failed to read PKCE record");
            return Err(Rejection::Backend);
        }
    };

    let stored: StoredRecord = serde_json::from_str(&raw).map_err(|_| Rejection::Corrupted)?;

    if now > stored.expires_at {
        return Err(Rejection::Expired);
    }

    let code_verifier =
        CodeVerifier::parse(stored.code_verifier).map_err(|_| Rejection::Tampered)?;

    Ok(PkceRecord {
        params: PkceParams {
            code_verifier,
            state: stored.state,
            context: stored.context,
        },
        expires_at: stored.expires_at,
    })
}

/// Serializes writes and stale-entry removal within one store.
type WriteLock = Arc<Mutex<()>>;

/// Deletes `storage_key` if it is expired, corrupted, or tampered.
///
/// The check and the delete run under the write lock, so a record stored
/// concurrently by the same store is never removed in place of the stale
/// one. Returns true if an entry was removed.
fn purge_if_stale(storage: &dyn SessionStorage, writes: &WriteLock, storage_key: &str) -> bool {
    let _guard = writes.lock().unwrap_or_else(PoisonError::into_inner);
    match inspect(storage, storage_key, now_ms()) {
        Err(rejection) if rejection.is_stale() => {
            remove(storage, storage_key, rejection);
            true
        }
        _ => false,
    }
}

fn remove(storage: &dyn SessionStorage, storage_key: &str, rejection: Rejection) {
    match rejection {
        Rejection::Expired => debug!(key = %storage_key, "Discarding expired PKCE record"),
        Rejection::Corrupted => warn!(key = %storage_key, "Discarding corrupted PKCE record"),
        Rejection::Tampered => {
            warn!(key = %storage_key, "Discarding PKCE record with malformed code verifier")
        }
        Rejection::Missing | Rejection::Backend => {}
    }
    if let Err(e) = storage.delete(storage_key) {
        warn!(key = %storage_key, error = %e, "Failed to delete PKCE record");
    }
}

/// Namespaced, self-cleaning store of PKCE parameters.
pub struct ParameterStore {
    storage: Arc<dyn SessionStorage>,
    namespace: String,
    default_ttl: Duration,
    writes: WriteLock,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterStore")
            .field("namespace", &self.namespace)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl ParameterStore {
    /// Creates a store with the default namespace and TTL.
    #[must_use]
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            storage,
            namespace: DEFAULT_NAMESPACE.to_string(),
            default_ttl: DEFAULT_TTL,
            writes: Arc::new(Mutex::new(())),
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a store using the namespace and TTL from `config`.
    #[must_use]
    pub fn from_config(storage: Arc<dyn SessionStorage>, config: &PkceConfig) -> Self {
        Self::new(storage)
            .with_namespace(config.namespace.clone())
            .with_default_ttl(config.ttl)
    }

    /// Sets the key prefix.
    ///
    /// An empty prefix would make every key in the shared storage look
    /// owned, so it is ignored and the previous namespace is kept.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        if namespace.is_empty() {
            warn!(kept = %self.namespace, "Ignoring empty PKCE storage namespace");
        } else {
            self.namespace = namespace;
        }
        self
    }

    /// Sets the TTL used by [`store`](Self::store).
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Returns the key prefix.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the default TTL.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the full storage key for a flow key.
    #[must_use]
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    /// Stores parameters under `key` with the default TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails. The caller must not
    /// redirect in that case.
    pub fn store(&self, key: &str, params: &PkceParams) -> Result<PkceRecord, PkceError> {
        self.store_with_ttl(key, params, self.default_ttl)
    }

    /// Stores parameters under `key`, replacing any previous record.
    ///
    /// When called inside a tokio runtime, also schedules a cleanup timer.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    pub fn store_with_ttl(
        &self,
        key: &str,
        params: &PkceParams,
        ttl: Duration,
    ) -> Result<PkceRecord, PkceError> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let expires_at = now_ms().saturating_add(ttl_ms);

        let stored = StoredRecord {
            code_verifier: params.code_verifier.expose_secret().to_string(),
            state: params.state.clone(),
            expires_at,
            context: params.context.clone(),
        };
        let json = serde_json::to_string(&stored)?;

        let storage_key = self.storage_key(key);
        {
            let _guard = self.write_guard();
            self.storage.set(&storage_key, &json)?;
        }
        debug!(key = %key, ttl_ms, "Stored PKCE parameters");

        self.schedule_cleanup(storage_key, ttl);

        Ok(PkceRecord {
            params: params.clone(),
            expires_at,
        })
    }

    /// Returns the live record for `key`, or `None`.
    ///
    /// Corrupted, expired, and tampered entries are deleted before
    /// returning `None`. Backend failures are logged and read as `None`.
    #[must_use]
    pub fn retrieve(&self, key: &str) -> Option<PkceRecord> {
        let storage_key = self.storage_key(key);
        match inspect(self.storage.as_ref(), &storage_key, now_ms()) {
            Ok(record) => Some(record),
            Err(rejection) => {
                if rejection.is_stale() {
                    purge_if_stale(self.storage.as_ref(), &self.writes, &storage_key);
                }
                None
            }
        }
    }

    /// Removes the record for `key`. Absent keys are a no-op.
    pub fn delete(&self, key: &str) {
        let storage_key = self.storage_key(key);
        if let Some(timer) = self.timers().remove(&storage_key) {
            timer.abort();
        }
        if let Err(e) = self.storage.delete(&storage_key) {
            warn!(key = %key, error = %e, "Failed to delete PKCE record");
        } else {
            debug!(key = %key, "Deleted PKCE record");
        }
    }

    /// Removes every entry under this store's namespace.
    ///
    /// Keys outside the namespace are left untouched. Returns the number of
    /// entries removed.
    pub fn clear_all(&self) -> usize {
        for (_, timer) in self.timers().drain() {
            timer.abort();
        }

        let mut removed = 0;
        for storage_key in self.owned_keys() {
            match self.storage.delete(&storage_key) {
                Ok(()) => removed += 1,
                Err(e) => warn!(key = %storage_key, error = %e, "Failed to delete PKCE record"),
            }
        }
        debug!(removed, "Cleared PKCE records");
        removed
    }

    /// Deletes every expired, corrupted, or tampered entry in the namespace.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let removed = self
            .owned_keys()
            .iter()
            .filter(|storage_key| {
                purge_if_stale(self.storage.as_ref(), &self.writes, storage_key)
            })
            .count();
        if removed > 0 {
            debug!(removed, "Purged stale PKCE records");
        }
        removed
    }

    /// Finds the live record whose state equals `state`.
    ///
    /// Returns the flow key (without namespace) and the record. Stale
    /// entries met along the way are deleted.
    #[must_use]
    pub fn find_by_state(&self, state: &str) -> Option<(String, PkceRecord)> {
        let now = now_ms();
        for storage_key in self.owned_keys() {
            match inspect(self.storage.as_ref(), &storage_key, now) {
                Ok(record) if states_match(record.state(), state) => {
                    let key = storage_key[self.namespace.len()..].to_string();
                    return Some((key, record));
                }
                Ok(_) => {}
                Err(rejection) if rejection.is_stale() => {
                    purge_if_stale(self.storage.as_ref(), &self.writes, &storage_key);
                }
                Err(_) => {}
            }
        }
        None
    }

    /// Storage keys under this namespace. Backend failures read as empty.
    fn owned_keys(&self) -> Vec<String> {
        if self.namespace.is_empty() {
            return Vec::new();
        }
        match self.storage.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter(|k| k.starts_with(&self.namespace))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to list PKCE storage keys");
                Vec::new()
            }
        }
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedules the advisory cleanup for `storage_key`.
    ///
    /// The timer only removes the entry if it is stale when it fires, so a
    /// timer left over from an earlier attempt cannot delete a newer record.
    fn schedule_cleanup(&self, storage_key: String, ttl: Duration) {
        let Ok(runtime) = Handle::try_current() else {
            debug!(key = %storage_key, "No async runtime; relying on read-time expiry");
            return;
        };

        let storage = Arc::clone(&self.storage);
        let writes = Arc::clone(&self.writes);
        let task_key = storage_key.clone();
        let task = runtime.spawn(async move {
            sleep(ttl.saturating_add(CLEANUP_GRACE)).await;
            if purge_if_stale(storage.as_ref(), &writes, &task_key) {
                debug!(key = %task_key, "Cleanup timer removed PKCE record");
            }
        });

        if let Some(previous) = self.timers().insert(storage_key, task) {
            previous.abort();
        }
    }
}

impl Drop for ParameterStore {
    fn drop(&mut self) {
        for (_, timer) in self.timers().drain() {
            timer.abort();
        }
    }
}
