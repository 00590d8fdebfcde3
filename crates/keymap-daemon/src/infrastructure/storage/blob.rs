//! Single-blob keymap backend: the whole grid is one atomic record.

use keymap_core::{GridDimensions, StoredBinding};
use tracing::debug;

use super::kv::{KeyValueStore, StorageKey};
use super::record::{decode_blob, encode_blob};
use crate::application::persistence::{BackendKind, KeymapBackend, StorageError};

pub struct BlobBackend<S> {
    store: S,
}

impl<S: KeyValueStore> BlobBackend<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    fn read_image(&self, dims: GridDimensions) -> Result<Option<Vec<StoredBinding>>, StorageError> {
        match self.store.read(&StorageKey::Blob)? {
            Some(bytes) => Ok(Some(decode_blob(dims, &bytes)?.cells)),
            None => Ok(None),
        }
    }
}

impl<S: KeyValueStore> KeymapBackend for BlobBackend<S> {
    fn kind(&self) -> BackendKind {
        BackendKind::Blob
    }

    fn probe(&self, dims: GridDimensions) -> Result<Option<StoredBinding>, StorageError> {
        Ok(self
            .read_image(dims)?
            .and_then(|cells| cells.into_iter().next()))
    }

    fn read_all(&self, dims: GridDimensions) -> Result<Vec<Option<StoredBinding>>, StorageError> {
        Ok(match self.read_image(dims)? {
            Some(cells) => cells.into_iter().map(Some).collect(),
            None => vec![None; dims.cell_count()],
        })
    }

    fn persist(
        &mut self,
        dims: GridDimensions,
        cells: &[StoredBinding],
        dirty: &[bool],
    ) -> Result<usize, StorageError> {
        if !dirty.iter().any(|d| *d) {
            return Ok(0);
        }
        let bytes = encode_blob(dims, cells)?;
        self.store.write(&StorageKey::Blob, &bytes)?;
        debug!(bytes = bytes.len(), "keymap blob written");
        Ok(1)
    }

    fn erase(&mut self, _dims: GridDimensions) -> Result<(), StorageError> {
        self.store.delete(&StorageKey::Blob)
    }
}
