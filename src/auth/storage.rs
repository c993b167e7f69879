//! Session-scoped key/value storage backends.
//!
//! The parameter store never touches a concrete medium directly; it goes
//! through [`SessionStorage`] (`get`/`set`/`delete`/`keys`). Two backends
//! ship with the crate:
//!
//! - [`MemoryStorage`]: process-local map, the equivalent of one browser
//!   tab's session storage. Used in tests and single-process hosts.
//! - [`FileStorage`]: one file per key inside a dedicated directory, for
//!   hosts that must survive a process restart mid-flow. Scope is the
//!   directory; point different sessions at different directories.
//!
//! # Example
//!
//! ```
//! use inbox_pkce::auth::storage::{MemoryStorage, SessionStorage};
//!
//! let storage = MemoryStorage::new();
//! storage.set("theme", "dark").unwrap();
//! assert_eq!(storage.get("theme").unwrap().as_deref(), Some("dark"));
//! storage.delete("theme").unwrap();
//! assert!(storage.get("theme").unwrap().is_none());
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::ProjectDirs;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// File extension for [`FileStorage`] entries.
const ENTRY_EXTENSION: &str = "json";

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failure.
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backend cannot be used (poisoned lock, missing scope, ...).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Minimal key/value interface over a session-scoped medium.
///
/// Implementations must make a completed `set` visible to the next `get`
/// and treat deleting an absent key as success.
pub trait SessionStorage: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error only on backend failure; absence is `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Writes `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write did not complete.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes `key`. Absent keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Lists every key currently stored, including ones owned by others.
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure.
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-memory storage scoped to the lifetime of the value.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".to_string()))
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

/// Directory-backed storage: one file per key.
///
/// File names are the hex SHA-256 of the key, so any key (spaces, slashes,
/// `..`, any length) maps to a single fixed-length file inside the
/// directory. Each file starts with a header line holding the hex-encoded
/// key, followed by the value. Writes go through a temp file and a rename
/// so readers never see a partial value.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Opens (and creates if needed) a storage directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Opened file-backed PKCE storage");
        Ok(Self { dir })
    }

    /// Opens the platform default directory.
    ///
    /// Prefers the per-user runtime directory (cleared on logout) and falls
    /// back to the cache directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if no home directory is known.
    pub fn open_default() -> Result<Self, StorageError> {
        let dir = default_dir().ok_or_else(|| {
            StorageError::Unavailable("no platform directory for PKCE storage".to_string())
        })?;
        Self::new(dir)
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir
            .join(format!("{}.{ENTRY_EXTENSION}", hex::encode(digest)))
    }
}

/// Splits an entry file into its decoded key and raw value bytes.
///
/// Returns `None` if the header line is missing or not a hex-encoded key.
fn split_entry(contents: &[u8]) -> Option<(String, &[u8])> {
    let newline = contents.iter().position(|&b| b == b'\n')?;
    let (header, rest) = contents.split_at(newline);
    let key = hex::decode(header).ok()?;
    Some((String::from_utf8(key).ok()?, &rest[1..]))
}

/// Default directory for [`FileStorage`].
#[must_use]
pub fn default_dir() -> Option<PathBuf> {
    ProjectDirs::from("dev", "inbox", "inbox-pkce").map(|dirs| {
        dirs.runtime_dir()
            .unwrap_or_else(|| dirs.cache_dir())
            .join("pkce")
    })
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.entry_path(key);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // A damaged header or non-UTF-8 value is a corrupted entry, not a
        // backend failure; an empty value lets the caller discard it.
        match split_entry(&contents) {
            Some((stored_key, value)) if stored_key == key => {
                Ok(Some(String::from_utf8(value.to_vec()).unwrap_or_default()))
            }
            Some(_) => {
                warn!(file = %path.display(), "PKCE storage entry belongs to another key");
                Ok(None)
            }
            None => Ok(Some(String::new())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.entry_path(key);
        let temp_path = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));

        let mut file = open_private(&temp_path)?;
        file.write_all(hex::encode(key.as_bytes()).as_bytes())?;
        file.write_all(b"\n")?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let contents = match fs::read(&path) {
                Ok(contents) => contents,
                // Removed between listing and reading.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match split_entry(&contents) {
                Some((key, _)) => keys.push(key),
                None => warn!(file = %path.display(), "Ignoring foreign file in PKCE storage"),
            }
        }
        Ok(keys)
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
}
