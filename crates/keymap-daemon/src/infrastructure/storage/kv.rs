//! Key-value stores underneath the keymap backends.
//!
//! [`KeyValueStore`] is the raw write/read/delete contract.  Two
//! implementations:
//!
//! - [`MemoryStore`] – a shared in-memory map that counts writes and
//!   deletes.  Clones share state, so a test can keep a handle after moving
//!   one into a backend.
//! - [`FileStore`] – one file per key under a root directory.  Writes go to
//!   a temporary sibling, are synced to disk, and are then renamed into
//!   place, so a crash leaves either the old record or the new one.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::application::persistence::StorageError;

/// Type tag of per-entry keymap records.
pub const ENTRY_TYPE_TAG: u16 = 0x4000;

const LAYER_MASK: u16 = 0x3F;

/// Address of one persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageKey {
    /// The whole-grid record.
    Blob,
    /// The record of one `(layer, key)` cell.
    Entry { layer: u8, key: u8 },
}

impl StorageKey {
    /// Composite id of an entry: `tag | (layer & 0x3F) << 8 | key`.
    pub fn entry_id(layer: u8, key: u8) -> u16 {
        ENTRY_TYPE_TAG | ((layer as u16 & LAYER_MASK) << 8) | key as u16
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKey::Blob => f.write_str("keys/keymap"),
            StorageKey::Entry { layer, key } => {
                write!(f, "keys/{:04x}", StorageKey::entry_id(*layer, *key))
            }
        }
    }
}

/// Raw durable storage addressed by [`StorageKey`].
pub trait KeyValueStore: Send {
    fn write(&mut self, key: &StorageKey, bytes: &[u8]) -> Result<(), StorageError>;

    /// `Ok(None)` if the key was never written or has been deleted.
    fn read(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError>;

    /// Deleting a missing key succeeds.
    fn delete(&mut self, key: &StorageKey) -> Result<(), StorageError>;
}

// ── MemoryStore ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryInner {
    entries: BTreeMap<String, Vec<u8>>,
    writes: usize,
    deletes: usize,
}

/// In-memory [`KeyValueStore`]; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total successful writes since creation.
    pub fn write_count(&self) -> usize {
        self.inner().writes
    }

    /// Total deletes of existing keys since creation.
    pub fn delete_count(&self) -> usize {
        self.inner().deletes
    }

    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of every stored record, keyed by its display name.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.inner().entries.clone()
    }

    /// Replaces a record without counting it as a write.
    pub fn insert_raw(&self, key: &StorageKey, bytes: Vec<u8>) {
        self.inner().entries.insert(key.to_string(), bytes);
    }
}

impl KeyValueStore for MemoryStore {
    fn write(&mut self, key: &StorageKey, bytes: &[u8]) -> Result<(), StorageError> {
        let mut inner = self.inner();
        inner.entries.insert(key.to_string(), bytes.to_vec());
        inner.writes += 1;
        Ok(())
    }

    fn read(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.inner().entries.get(&key.to_string()).cloned())
    }

    fn delete(&mut self, key: &StorageKey) -> Result<(), StorageError> {
        let mut inner = self.inner();
        if inner.entries.remove(&key.to_string()).is_some() {
            inner.deletes += 1;
        }
        Ok(())
    }
}

// ── FileStore ─────────────────────────────────────────────────────────────────

/// [`KeyValueStore`] backed by one file per key under `root`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `root`; directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.root.join(key.to_string())
    }
}

/// Writes `bytes` to `tmp`, flushes them to disk, then renames over `path`.
fn replace_synced(tmp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(tmp, path)
}

fn io_error(key: &StorageKey, source: std::io::Error) -> StorageError {
    StorageError::Io {
        key: key.to_string(),
        source,
    }
}

impl KeyValueStore for FileStore {
    fn write(&mut self, key: &StorageKey, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_error(key, e))?;
        }
        let tmp = path.with_extension("tmp");
        replace_synced(&tmp, &path, bytes).map_err(|e| io_error(key, e))
    }

    fn read(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn delete(&mut self, key: &StorageKey) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }
}
