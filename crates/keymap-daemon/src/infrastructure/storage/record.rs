//! bincode encoding of persisted keymap records.

use keymap_core::{GridDimensions, StoredBinding};
use serde::{Deserialize, Serialize};

use super::kv::StorageKey;
use crate::application::persistence::StorageError;

/// The single record written by the blob backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobImage {
    pub layers: u8,
    pub keys_per_layer: u8,
    /// Layer-major, one per cell.
    pub cells: Vec<StoredBinding>,
}

pub fn encode_cell(key: &StorageKey, cell: &StoredBinding) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(cell).map_err(|e| StorageError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub fn decode_cell(key: &StorageKey, bytes: &[u8]) -> Result<StoredBinding, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub fn encode_blob(dims: GridDimensions, cells: &[StoredBinding]) -> Result<Vec<u8>, StorageError> {
    let image = BlobImage {
        layers: dims.layers,
        keys_per_layer: dims.keys_per_layer,
        cells: cells.to_vec(),
    };
    bincode::serialize(&image).map_err(|e| StorageError::Encode {
        key: StorageKey::Blob.to_string(),
        reason: e.to_string(),
    })
}

/// Decodes a blob and checks it was written for a grid of shape `dims`.
pub fn decode_blob(dims: GridDimensions, bytes: &[u8]) -> Result<BlobImage, StorageError> {
    let key = StorageKey::Blob.to_string();
    let image: BlobImage = bincode::deserialize(bytes).map_err(|e| StorageError::Decode {
        key: key.clone(),
        reason: e.to_string(),
    })?;
    if image.layers != dims.layers
        || image.keys_per_layer != dims.keys_per_layer
        || image.cells.len() != dims.cell_count()
    {
        return Err(StorageError::Decode {
            key,
            reason: format!(
                "blob holds a {}x{} grid of {} cells, expected {}x{}",
                image.layers,
                image.keys_per_layer,
                image.cells.len(),
                dims.layers,
                dims.keys_per_layer
            ),
        });
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell() -> StoredBinding {
        StoredBinding {
            behavior_id: 8,
            label: Some("LAYER_TAP".to_string()),
            param1: 2,
            param2: 0x29,
        }
    }

    #[test]
    fn test_cell_survives_encoding() {
        let key = StorageKey::Entry { layer: 0, key: 0 };
        let bytes = encode_cell(&key, &cell()).unwrap();
        assert_eq!(decode_cell(&key, &bytes).unwrap(), cell());
    }

    #[test]
    fn test_truncated_cell_is_a_decode_error() {
        let key = StorageKey::Entry { layer: 0, key: 0 };
        let bytes = encode_cell(&key, &cell()).unwrap();
        let err = decode_cell(&key, &bytes[..bytes.len() / 2]).unwrap_err();
        assert!(err.is_undecodable());
    }

    #[test]
    fn test_blob_for_other_grid_shape_is_rejected() {
        // Arrange
        let written = GridDimensions::new(1, 2).unwrap();
        let bytes = encode_blob(written, &[cell(), StoredBinding::unset()]).unwrap();

        // Act
        let result = decode_blob(GridDimensions::new(2, 2).unwrap(), &bytes);

        // Assert
        assert!(matches!(result, Err(StorageError::Decode { .. })));
        assert!(decode_blob(written, &bytes).is_ok());
    }
}
