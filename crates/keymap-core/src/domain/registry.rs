//! Behavior registry: the immutable id ↔ label table.
//!
//! Every key binding names a *behavior* (emit a keycode, switch layer, …).
//! Behaviors are opaque to this crate; all it needs is a stable numeric id
//! for the wire and a label that survives rebuilds in persisted data.
//!
//! The registry is built exactly once from a declarative list (the built-in
//! firmware table or the `[[keymap.behaviors]]` section of the config file)
//! and never mutated afterwards.  Lookups are linear scans; the table holds a
//! few dozen entries at most.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric behavior identifier as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BehaviorId(pub u32);

impl fmt::Display for BehaviorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of the declarative behavior list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorDescriptor {
    pub id: u32,
    pub label: String,
}

impl BehaviorDescriptor {
    pub fn new(id: u32, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }
}

/// Errors raised while building a [`BehaviorRegistry`].
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("duplicate behavior id {0}")]
    DuplicateId(u32),

    #[error("duplicate behavior label {0:?}")]
    DuplicateLabel(String),

    #[error("behavior {0} has an empty label")]
    EmptyLabel(u32),

    /// Ids index a dense table, so absurdly large ids are refused.
    #[error("behavior id {id} exceeds the maximum of {max}")]
    IdTooLarge { id: u32, max: u32 },
}

/// Largest behavior id accepted when building a registry.
pub const MAX_BEHAVIOR_ID: u32 = 1023;

/// The firmware behavior table, indexed by behavior id.
pub const BUILTIN_BEHAVIORS: &[(u32, &str)] = &[
    (0, "BACKLIGHT"),
    (1, "BLUETOOTH"),
    (2, "CAPS_WORD"),
    (3, "EXT_POWER"),
    (4, "GRAVE_ESCAPE"),
    (5, "KEY_PRESS"),
    (6, "KEY_REPEAT"),
    (7, "KEY_TOGGLE"),
    (8, "LAYER_TAP"),
    (9, "MACRO_TAP"),
    (10, "MACRO_PRESS"),
    (11, "MACRO_RELEASE"),
    (12, "MACRO_TAP_TIME"),
    (13, "MACRO_WAIT_TIME"),
    (14, "MACRO_PAUSE_FOR_RELEASE"),
    (15, "MOD_TAP"),
    (16, "MOMENTARY_LAYER"),
    (17, "NONE"),
    (18, "OUTPUTS"),
    (19, "RESET"),
    (20, "BOOTLOAD"),
    (21, "RGB_UNDERGLOW"),
    (22, "SENSOR_ROTATE_KEY_PRESS"),
    (23, "STICKY_KEY"),
    (24, "STICKY_LAYER"),
    (25, "TO_LAYER"),
    (26, "TOGGLE_LAYER"),
    (27, "TRANSPARENT"),
    (28, "MACRO_PARAM_1TO1"),
    (29, "MACRO_PARAM_1TO2"),
    (30, "MACRO_PARAM_2TO1"),
    (31, "MACRO_PARAM_2TO2"),
    (32, "ANIMATION"),
];

/// Immutable id ↔ label table.
///
/// Internally a dense vector indexed by id; gaps (ids with no behavior) are
/// `None`, mirroring a sparse firmware table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BehaviorRegistry {
    by_id: Vec<Option<String>>,
}

impl BehaviorRegistry {
    /// Builds a registry from a declarative behavior list.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] for duplicate ids or labels, empty labels,
    /// and ids above [`MAX_BEHAVIOR_ID`].
    pub fn new<I>(descriptors: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = BehaviorDescriptor>,
    {
        let mut by_id: Vec<Option<String>> = Vec::new();
        let mut labels = HashSet::new();

        for BehaviorDescriptor { id, label } in descriptors {
            if id > MAX_BEHAVIOR_ID {
                return Err(RegistryError::IdTooLarge {
                    id,
                    max: MAX_BEHAVIOR_ID,
                });
            }
            if label.is_empty() {
                return Err(RegistryError::EmptyLabel(id));
            }
            let slot = id as usize;
            if by_id.len() <= slot {
                by_id.resize(slot + 1, None);
            }
            if by_id[slot].is_some() {
                return Err(RegistryError::DuplicateId(id));
            }
            if !labels.insert(label.clone()) {
                return Err(RegistryError::DuplicateLabel(label));
            }
            by_id[slot] = Some(label);
        }

        tracing::debug!(behaviors = labels.len(), "behavior registry built");
        Ok(Self { by_id })
    }

    /// Builds the registry from [`BUILTIN_BEHAVIORS`], placing each label at
    /// the id the table gives it.
    pub fn builtin() -> Self {
        let len = BUILTIN_BEHAVIORS
            .iter()
            .map(|(id, _)| *id as usize + 1)
            .max()
            .unwrap_or(0);
        let mut by_id = vec![None; len];
        for (id, label) in BUILTIN_BEHAVIORS {
            by_id[*id as usize] = Some((*label).to_string());
        }
        Self { by_id }
    }

    /// Returns the label for `id`, or `None` if the id is out of range or unassigned.
    pub fn resolve_by_id(&self, id: BehaviorId) -> Option<&str> {
        self.by_id.get(id.0 as usize)?.as_deref()
    }

    /// Returns the id whose label equals `label`, or `None`.
    pub fn resolve_by_label(&self, label: &str) -> Option<BehaviorId> {
        self.by_id
            .iter()
            .position(|slot| slot.as_deref() == Some(label))
            .map(|idx| BehaviorId(idx as u32))
    }

    /// Returns `true` if `id` names a live entry.
    pub fn contains(&self, id: BehaviorId) -> bool {
        self.resolve_by_id(id).is_some()
    }

    /// Number of live behaviors.
    pub fn len(&self) -> usize {
        self.by_id.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over all live behaviors in id order.
    pub fn iter(&self) -> impl Iterator<Item = (BehaviorId, &str)> {
        self.by_id
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_deref().map(|label| (BehaviorId(idx as u32), label)))
    }
}
