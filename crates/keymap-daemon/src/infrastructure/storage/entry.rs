//! Per-entry keymap backend: one record per `(layer, key)` cell.
//!
//! Only dirty cells are written on persist, so a single-key edit costs one
//! small write instead of rewriting the whole grid.

use keymap_core::{GridDimensions, StoredBinding};
use tracing::debug;

use super::kv::{KeyValueStore, StorageKey};
use super::record::{decode_cell, encode_cell};
use crate::application::persistence::{BackendKind, KeymapBackend, StorageError};

pub struct EntryBackend<S> {
    store: S,
}

impl<S: KeyValueStore> EntryBackend<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    fn read_cell(&self, key: StorageKey) -> Result<Option<StoredBinding>, StorageError> {
        match self.store.read(&key)? {
            Some(bytes) => Ok(Some(decode_cell(&key, &bytes)?)),
            None => Ok(None),
        }
    }
}

fn entry_key(dims: GridDimensions, idx: usize) -> StorageKey {
    let pos = dims.position(idx);
    StorageKey::Entry {
        layer: pos.layer,
        key: pos.key,
    }
}

impl<S: KeyValueStore> KeymapBackend for EntryBackend<S> {
    fn kind(&self) -> BackendKind {
        BackendKind::Entry
    }

    fn probe(&self, _dims: GridDimensions) -> Result<Option<StoredBinding>, StorageError> {
        self.read_cell(StorageKey::Entry { layer: 0, key: 0 })
    }

    fn read_all(&self, dims: GridDimensions) -> Result<Vec<Option<StoredBinding>>, StorageError> {
        (0..dims.cell_count())
            .map(|idx| {
                let pos = dims.position(idx);
                self.read_cell(entry_key(dims, idx)).map_err(|e| match e {
                    StorageError::Decode { reason, .. } => StorageError::UnreadableCell {
                        layer: pos.layer,
                        key: pos.key,
                        reason,
                    },
                    other => other,
                })
            })
            .collect()
    }

    fn persist(
        &mut self,
        dims: GridDimensions,
        cells: &[StoredBinding],
        dirty: &[bool],
    ) -> Result<usize, StorageError> {
        let mut writes = 0;
        for (idx, cell) in cells.iter().enumerate() {
            if !dirty.get(idx).copied().unwrap_or(false) {
                continue;
            }
            let key = entry_key(dims, idx);
            let bytes = encode_cell(&key, cell)?;
            self.store.write(&key, &bytes)?;
            writes += 1;
        }
        debug!(writes, "keymap entries written");
        Ok(writes)
    }

    fn erase(&mut self, dims: GridDimensions) -> Result<(), StorageError> {
        for idx in 0..dims.cell_count() {
            self.store.delete(&entry_key(dims, idx))?;
        }
        Ok(())
    }
}
