//! The durability seam the keymap store drives.
//!
//! [`KeymapBackend`] speaks in whole-grid terms (probe the first cell, read
//! every cell, persist the dirty ones, erase everything).  The two
//! implementations in `infrastructure::storage` map those calls onto a
//! key-value store: one blob for the whole grid, or one record per cell.

use std::fmt;

use keymap_core::{GridDimensions, StoredBinding};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for backend I/O and record encoding.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying store failed to read, write, or delete.
    #[error("I/O error on storage key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// A record could not be serialized.
    #[error("failed to encode storage key {key}: {reason}")]
    Encode { key: String, reason: String },

    /// Persisted bytes could not be decoded into a record.
    #[error("failed to decode storage key {key}: {reason}")]
    Decode { key: String, reason: String },

    /// A single cell's record exists but cannot be decoded.
    #[error("record for cell ({layer}, {key}) is unreadable: {reason}")]
    UnreadableCell { layer: u8, key: u8, reason: String },
}

impl StorageError {
    /// `true` when the bytes exist but are unreadable, as opposed to an I/O failure.
    pub fn is_undecodable(&self) -> bool {
        matches!(
            self,
            StorageError::Decode { .. } | StorageError::UnreadableCell { .. }
        )
    }
}

/// Which persistence layout is in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One record covering the whole grid.
    #[default]
    Blob,
    /// One record per `(layer, key)` cell.
    Entry,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Blob => f.write_str("blob"),
            BackendKind::Entry => f.write_str("entry"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blob" => Ok(BackendKind::Blob),
            "entry" => Ok(BackendKind::Entry),
            other => Err(format!("unknown storage backend {other:?} (expected blob or entry)")),
        }
    }
}

/// Durable storage for the keymap grid.
///
/// Cells are addressed by their layer-major index into `dims`.  Calls are
/// synchronous and may block on I/O; every failure is returned to the caller.
#[cfg_attr(test, mockall::automock)]
pub trait KeymapBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Reads only cell `(0, 0)`.
    ///
    /// `Ok(None)` means nothing has been persisted for it.  A
    /// [`StorageError::Decode`] means the bytes are there but unreadable.
    fn probe(&self, dims: GridDimensions) -> Result<Option<StoredBinding>, StorageError>;

    /// Reads every cell; `None` for cells never persisted.
    ///
    /// The returned vector has exactly `dims.cell_count()` entries.
    fn read_all(&self, dims: GridDimensions) -> Result<Vec<Option<StoredBinding>>, StorageError>;

    /// Persists the cells whose `dirty` flag is set and returns the number of
    /// backend writes performed.
    ///
    /// `cells` and `dirty` both cover the whole grid.
    fn persist(
        &mut self,
        dims: GridDimensions,
        cells: &[StoredBinding],
        dirty: &[bool],
    ) -> Result<usize, StorageError>;

    /// Removes every persisted record for the grid.
    fn erase(&mut self, dims: GridDimensions) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parses_from_cli_text() {
        assert_eq!("blob".parse::<BackendKind>(), Ok(BackendKind::Blob));
        assert_eq!("entry".parse::<BackendKind>(), Ok(BackendKind::Entry));
        assert!("sqlite".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_backend_kind_display_matches_config_spelling() {
        assert_eq!(BackendKind::Blob.to_string(), "blob");
        assert_eq!(BackendKind::Entry.to_string(), "entry");
    }

    #[test]
    fn test_decode_error_is_undecodable() {
        let err = StorageError::Decode {
            key: "keys/keymap".to_string(),
            reason: "truncated".to_string(),
        };
        assert!(err.is_undecodable());
        let io = StorageError::Io {
            key: "keys/keymap".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk gone"),
        };
        assert!(!io.is_undecodable());
    }
}
