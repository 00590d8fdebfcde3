//! Keymap grid geometry.
//!
//! The keymap is a fixed `layers × keys_per_layer` grid stored layer-major in
//! a flat vector.  Both dimensions travel on the wire as single bytes, and the
//! per-entry storage key reserves six bits for the layer, which caps the layer
//! count at [`MAX_LAYERS`].

use serde::{Deserialize, Serialize};

use crate::domain::binding::ValidationError;

/// Maximum number of layers (six bits of the per-entry storage key).
pub const MAX_LAYERS: u8 = 64;

/// Maximum number of keys per layer (one byte on the wire).
pub const MAX_KEYS_PER_LAYER: u8 = u8::MAX;

/// A `(layer, key)` cell address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPosition {
    pub layer: u8,
    pub key: u8,
}

impl KeyPosition {
    pub fn new(layer: u8, key: u8) -> Self {
        Self { layer, key }
    }
}

/// Dimensions of the keymap grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDimensions {
    pub layers: u8,
    pub keys_per_layer: u8,
}

impl GridDimensions {
    /// Creates grid dimensions, rejecting empty grids and layer counts above [`MAX_LAYERS`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidDimensions`] when either dimension is
    /// zero or `layers` exceeds [`MAX_LAYERS`].
    pub fn new(layers: u8, keys_per_layer: u8) -> Result<Self, ValidationError> {
        if layers == 0 || layers > MAX_LAYERS || keys_per_layer == 0 {
            return Err(ValidationError::InvalidDimensions {
                layers,
                keys_per_layer,
            });
        }
        Ok(Self {
            layers,
            keys_per_layer,
        })
    }

    /// Total number of cells.
    pub fn cell_count(&self) -> usize {
        self.layers as usize * self.keys_per_layer as usize
    }

    /// Returns the flat index of `(layer, key)`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::OutOfRange`] if `layer >= layers` or
    /// `key >= keys_per_layer`.
    pub fn index(&self, layer: u8, key: u8) -> Result<usize, ValidationError> {
        if layer >= self.layers || key >= self.keys_per_layer {
            return Err(ValidationError::OutOfRange {
                layer,
                key,
                layers: self.layers,
                keys_per_layer: self.keys_per_layer,
            });
        }
        Ok(layer as usize * self.keys_per_layer as usize + key as usize)
    }

    /// Inverse of [`index`](Self::index) for indices below [`cell_count`](Self::cell_count).
    pub fn position(&self, index: usize) -> KeyPosition {
        let keys = self.keys_per_layer as usize;
        KeyPosition {
            layer: (index / keys) as u8,
            key: (index % keys) as u8,
        }
    }

    /// Iterates every cell address in layer-major order.
    pub fn positions(&self) -> impl Iterator<Item = KeyPosition> + '_ {
        (0..self.cell_count()).map(move |idx| self.position(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_is_layer_major() {
        let dims = GridDimensions::new(3, 4).unwrap();
        assert_eq!(dims.index(0, 0), Ok(0));
        assert_eq!(dims.index(0, 3), Ok(3));
        assert_eq!(dims.index(1, 0), Ok(4));
        assert_eq!(dims.index(2, 3), Ok(11));
    }

    #[test]
    fn test_index_rejects_layer_equal_to_layer_count() {
        let dims = GridDimensions::new(2, 4).unwrap();
        assert!(matches!(
            dims.index(2, 0),
            Err(ValidationError::OutOfRange { layer: 2, key: 0, .. })
        ));
    }

    #[test]
    fn test_index_rejects_key_equal_to_key_count() {
        let dims = GridDimensions::new(2, 4).unwrap();
        assert!(matches!(
            dims.index(0, 4),
            Err(ValidationError::OutOfRange { layer: 0, key: 4, .. })
        ));
    }

    #[test]
    fn test_position_inverts_index() {
        let dims = GridDimensions::new(5, 7).unwrap();
        for pos in dims.positions() {
            let idx = dims.index(pos.layer, pos.key).unwrap();
            assert_eq!(dims.position(idx), pos);
        }
    }

    #[test]
    fn test_zero_and_oversized_dimensions_are_rejected() {
        assert!(GridDimensions::new(0, 4).is_err());
        assert!(GridDimensions::new(2, 0).is_err());
        assert!(GridDimensions::new(MAX_LAYERS + 1, 4).is_err());
        assert!(GridDimensions::new(MAX_LAYERS, MAX_KEYS_PER_LAYER).is_ok());
    }
}
