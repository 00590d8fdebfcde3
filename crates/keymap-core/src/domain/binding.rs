//! Key bindings, wire records, and the codec between them.
//!
//! Three shapes of the same data exist:
//!
//! | Type              | Where it lives            | Behavior is named by            |
//! |-------------------|---------------------------|---------------------------------|
//! | [`KeyBinding`]    | the in-memory grid        | a registry-checked [`BehaviorId`] |
//! | [`KeyRecord`]     | report / stream payloads  | a raw `u32`                     |
//! | [`StoredBinding`] | persistence backends      | label text plus the id it had   |
//!
//! The persisted form carries the label because ids may be renumbered between
//! builds while labels stay stable.  On load the daemon re-resolves every label
//! against the current registry (the *repointing* pass).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::registry::{BehaviorId, BehaviorRegistry};

/// Wire value of `behavior_id` for a cell with no behavior bound.
pub const UNSET_BEHAVIOR_ID: u32 = u32::MAX;

/// Errors for records, bindings, and grid addresses that fail validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("cell ({layer}, {key}) is outside the {layers}x{keys_per_layer} keymap")]
    OutOfRange {
        layer: u8,
        key: u8,
        layers: u8,
        keys_per_layer: u8,
    },

    #[error("behavior id {0} does not name a registered behavior")]
    InvalidBehaviorId(u32),

    #[error("behavior label {0:?} is not registered")]
    InvalidLabel(String),

    #[error("invalid keymap dimensions {layers}x{keys_per_layer}")]
    InvalidDimensions { layers: u8, keys_per_layer: u8 },
}

/// The binding held by one grid cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyBinding {
    /// `None` when no behavior is bound to the key.
    pub behavior: Option<BehaviorId>,
    pub param1: u32,
    pub param2: u32,
}

impl KeyBinding {
    pub fn new(behavior: BehaviorId, param1: u32, param2: u32) -> Self {
        Self {
            behavior: Some(behavior),
            param1,
            param2,
        }
    }

    /// A cell with no behavior bound.
    pub fn unset() -> Self {
        Self::default()
    }

    pub fn is_unset(&self) -> bool {
        self.behavior.is_none()
    }
}

/// Wire-safe binding: the behavior is a plain number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRecord {
    pub behavior_id: u32,
    pub param1: u32,
    pub param2: u32,
}

impl KeyRecord {
    /// Size of a record on the wire: three little-endian `u32`s.
    pub const WIRE_SIZE: usize = 12;

    pub fn new(behavior_id: u32, param1: u32, param2: u32) -> Self {
        Self {
            behavior_id,
            param1,
            param2,
        }
    }

    /// Appends the 12-byte little-endian encoding to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.behavior_id.to_le_bytes());
        buf.extend_from_slice(&self.param1.to_le_bytes());
        buf.extend_from_slice(&self.param2.to_le_bytes());
    }

    /// Reads a record from the first 12 bytes of `bytes`, or `None` if too short.
    pub fn read_from(bytes: &[u8]) -> Option<Self> {
        let field = |i: usize| -> Option<u32> {
            let chunk = bytes.get(i * 4..i * 4 + 4)?;
            Some(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        };
        Some(Self {
            behavior_id: field(0)?,
            param1: field(1)?,
            param2: field(2)?,
        })
    }
}

/// Persisted form of one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBinding {
    /// Id the label resolved to when the cell was written.
    pub behavior_id: u32,
    /// Durable behavior identity; `None` for an unset cell.
    pub label: Option<String>,
    pub param1: u32,
    pub param2: u32,
}

impl StoredBinding {
    pub fn unset() -> Self {
        Self {
            behavior_id: UNSET_BEHAVIOR_ID,
            label: None,
            param1: 0,
            param2: 0,
        }
    }
}

/// Converts between [`KeyBinding`], [`KeyRecord`], and [`StoredBinding`].
///
/// Stateless apart from the borrowed registry; every method is pure.
#[derive(Debug, Clone, Copy)]
pub struct BindingCodec<'a> {
    registry: &'a BehaviorRegistry,
}

impl<'a> BindingCodec<'a> {
    pub fn new(registry: &'a BehaviorRegistry) -> Self {
        Self { registry }
    }

    /// Decodes a wire record into a binding.
    ///
    /// [`UNSET_BEHAVIOR_ID`] decodes to an unset binding.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidBehaviorId`] if the id is out of the
    /// table's range or maps to no behavior.
    pub fn to_binding(&self, record: &KeyRecord) -> Result<KeyBinding, ValidationError> {
        if record.behavior_id == UNSET_BEHAVIOR_ID {
            return Ok(KeyBinding {
                behavior: None,
                param1: record.param1,
                param2: record.param2,
            });
        }
        let id = BehaviorId(record.behavior_id);
        if !self.registry.contains(id) {
            return Err(ValidationError::InvalidBehaviorId(record.behavior_id));
        }
        Ok(KeyBinding::new(id, record.param1, record.param2))
    }

    /// Encodes a binding as a wire record.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidLabel`] if the binding names a
    /// behavior the registry does not know.  The store never holds such a
    /// binding once initialised, so this only fires on misuse.
    pub fn to_record(&self, binding: &KeyBinding) -> Result<KeyRecord, ValidationError> {
        match binding.behavior {
            None => Ok(KeyRecord::new(UNSET_BEHAVIOR_ID, binding.param1, binding.param2)),
            Some(id) if self.registry.contains(id) => {
                Ok(KeyRecord::new(id.0, binding.param1, binding.param2))
            }
            Some(id) => Err(ValidationError::InvalidLabel(format!("#{id}"))),
        }
    }

    /// Captures a binding in its persisted form.
    ///
    /// # Errors
    ///
    /// Same as [`to_record`](Self::to_record).
    pub fn to_stored(&self, binding: &KeyBinding) -> Result<StoredBinding, ValidationError> {
        let Some(id) = binding.behavior else {
            return Ok(StoredBinding {
                param1: binding.param1,
                param2: binding.param2,
                ..StoredBinding::unset()
            });
        };
        let label = self
            .registry
            .resolve_by_id(id)
            .ok_or_else(|| ValidationError::InvalidLabel(format!("#{id}")))?;
        Ok(StoredBinding {
            behavior_id: id.0,
            label: Some(label.to_string()),
            param1: binding.param1,
            param2: binding.param2,
        })
    }

    /// Returns `true` if a stored cell's label resolves (unset cells always do).
    pub fn stored_label_resolves(&self, stored: &StoredBinding) -> bool {
        match &stored.label {
            None => true,
            Some(label) => self.registry.resolve_by_label(label).is_some(),
        }
    }

    /// Re-resolves a stored cell against the current registry.
    ///
    /// Returns the canonical binding and whether its id differs from the one
    /// recorded at write time (the cell needs re-persisting).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidLabel`] when the label matches no
    /// registered behavior.
    pub fn repoint(&self, stored: &StoredBinding) -> Result<(KeyBinding, bool), ValidationError> {
        let Some(label) = &stored.label else {
            let binding = KeyBinding {
                behavior: None,
                param1: stored.param1,
                param2: stored.param2,
            };
            return Ok((binding, stored.behavior_id != UNSET_BEHAVIOR_ID));
        };
        let id = self
            .registry
            .resolve_by_label(label)
            .ok_or_else(|| ValidationError::InvalidLabel(label.clone()))?;
        let binding = KeyBinding::new(id, stored.param1, stored.param2);
        Ok((binding, id.0 != stored.behavior_id))
    }
}
