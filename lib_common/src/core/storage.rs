//! # Durable State Storage
//!
//! Backing store for the persistent accumulators. Each accumulator owns exactly
//! one storage key; [`StateDir`] hands out [`JsonFileStore`]s and refuses a
//! second claim on a key while the first store is alive.
//!
//! ## Guarantees:
//! - **Atomic writes**: the value is written to `<key>.json.tmp`, fsynced, then
//!   renamed over `<key>.json`. Readers only ever see a complete document.
//! - **Forgiving reads**: a missing, empty or undecodable file loads as `None`
//!   and the caller falls back to its default. Read problems are logged, never
//!   returned.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::HashSet;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Errors raised while claiming or writing durable state.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure on `path`.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The value could not be encoded as JSON.
    #[error("failed to encode state for {path}: {source}")]
    Encode {
        /// Target file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Another live store already owns the key.
    #[error("storage key '{0}' is already owned by another accumulator")]
    KeyInUse(String),

    /// Keys must be non-empty and made of ASCII letters, digits, `_` or `-`.
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
}

/// # State Store
///
/// Load/store seam used by [`PersistentAccumulator`](crate::core::accumulator::PersistentAccumulator).
/// `load` never fails: anything unreadable is reported as `None`.
pub trait StateStore<A>: Send + Sync + 'static {
    /// Reads the last persisted value, if there is a usable one.
    fn load(&self) -> impl Future<Output = Option<A>> + Send;

    /// Durably replaces the persisted value.
    fn store(&self, value: &A) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// # State Directory
///
/// Root directory for the JSON state files plus the registry of claimed keys.
/// Cloning shares the registry.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl StateDir {
    /// Creates a handle rooted at `root`. The directory is created lazily on
    /// the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            claimed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Claims `key` and returns the store for `<root>/<key>.json`.
    ///
    /// # Errors
    /// [`StorageError::InvalidKey`] for malformed keys and
    /// [`StorageError::KeyInUse`] while another store for the key is alive.
    pub fn open(&self, key: &str) -> Result<JsonFileStore, StorageError> {
        let valid = !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        if !claimed.insert(key.to_string()) {
            return Err(StorageError::KeyInUse(key.to_string()));
        }

        Ok(JsonFileStore {
            path: self.root.join(format!("{key}.json")),
            claim: Some(KeyClaim {
                key: key.to_string(),
                claimed: Arc::clone(&self.claimed),
            }),
        })
    }
}

/// Releases a key when its store is dropped.
#[derive(Debug)]
struct KeyClaim {
    key: String,
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl Drop for KeyClaim {
    fn drop(&mut self) {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        claimed.remove(&self.key);
    }
}

/// # JSON File Store
///
/// Persists a serde value as a pretty-printed JSON document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    claim: Option<KeyClaim>,
}

impl JsonFileStore {
    /// A store for an explicit path, outside of any [`StateDir`] registry.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), claim: None }
    }

    /// Location of the JSON document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this store holds a [`StateDir`] key claim.
    pub fn is_claimed(&self) -> bool {
        self.claim.is_some()
    }
}

impl<A> StateStore<A> for JsonFileStore
where
    A: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn load(&self) -> Option<A> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No persisted state, starting from default");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Unreadable state file, starting from default");
                return None;
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            tracing::debug!(path = %self.path.display(), "Empty state file, starting from default");
            return None;
        }

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Corrupt state file, starting from default");
                None
            }
        }
    }

    async fn store(&self, value: &A) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Encode {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &bytes).await
    }
}

/// # Memory Store
///
/// In-process [`StateStore`] that keeps the value in memory. Clones share the
/// slot, so a test can hand one clone to an accumulator and inspect the other.
/// Writes can be made to fail on demand.
#[derive(Debug)]
pub struct MemoryStore<A> {
    inner: Arc<Mutex<MemorySlot<A>>>,
}

#[derive(Debug)]
struct MemorySlot<A> {
    value: Option<A>,
    writes: usize,
    failing: bool,
}

impl<A> Clone for MemoryStore<A> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<A: Clone> MemoryStore<A> {
    /// An empty store.
    pub fn new() -> Self {
        Self::seeded(None)
    }

    /// A store that already holds `value`.
    pub fn with_value(value: A) -> Self {
        Self::seeded(Some(value))
    }

    fn seeded(value: Option<A>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemorySlot { value, writes: 0, failing: false })),
        }
    }

    /// The currently stored value.
    pub fn value(&self) -> Option<A> {
        self.slot().value.clone()
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.slot().writes
    }

    /// Makes subsequent writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.slot().failing = failing;
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, MemorySlot<A>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A: Clone> Default for MemoryStore<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> StateStore<A> for MemoryStore<A>
where
    A: Clone + Send + Sync + 'static,
{
    async fn load(&self) -> Option<A> {
        self.value()
    }

    async fn store(&self, value: &A) -> Result<(), StorageError> {
        let mut slot = self.slot();
        if slot.failing {
            return Err(StorageError::Io {
                path: PathBuf::from("<memory>"),
                source: std::io::Error::other("simulated write failure"),
            });
        }
        slot.value = Some(value.clone());
        slot.writes += 1;
        Ok(())
    }
}

/// Write-temp-then-rename so a crash never leaves a torn document behind.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_error(parent))?;
    }

    let tmp = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&tmp).await.map_err(io_error(&tmp))?;
    file.write_all(bytes).await.map_err(io_error(&tmp))?;
    file.sync_all().await.map_err(io_error(&tmp))?;
    drop(file);

    tokio::fs::rename(&tmp, path).await.map_err(io_error(path))?;
    tracing::trace!(path = %path.display(), bytes = bytes.len(), "State persisted");
    Ok(())
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError {
    let path = path.to_path_buf();
    move |source| StorageError::Io { path, source }
}
