//! KeymapStore: the in-memory grid, dirty tracking, and load/flush orchestration.
//!
//! The store owns the live keymap and the backend it persists to.  Writes
//! land in memory immediately and only reach the backend on [`KeymapStore::flush`],
//! which protocol handlers call on an explicit commit.
//!
//! # Boot-time validation
//!
//! [`KeymapStore::load`] runs once at startup:
//!
//! 1. Probe cell `(0, 0)`.  If its label no longer resolves (or the bytes are
//!    unreadable) the persisted keymap is stale: erase it and keep the
//!    configured defaults.
//! 2. Otherwise read every cell and repoint each label to the current
//!    registry id.  Cells whose id moved are marked dirty so the corrected id
//!    is written on the next flush.
//! 3. A label that resolves to nothing, or a later cell whose record cannot
//!    be decoded, is fatal: [`StoreError::Corruption`].
//!
//! The freshly loaded grid replaces the live one only when every step succeeds.

use std::sync::Arc;

use keymap_core::{
    BehaviorRegistry, BindingCodec, GridDimensions, KeyBinding, KeyRecord, StoredBinding,
    ValidationError,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::persistence::{BackendKind, KeymapBackend, StorageError};

/// Error type for keymap store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A persisted cell cannot be turned back into a binding.
    #[error("persisted binding at ({layer}, {key}) is corrupt: {reason}")]
    Corruption { layer: u8, key: u8, reason: String },

    #[error("default keymap has {actual} cells but the grid needs {expected}")]
    DefaultsMismatch { expected: usize, actual: usize },
}

/// How [`KeymapStore::load`] populated the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Nothing was persisted; defaults are live.
    FirstBoot,
    /// Persisted cells were loaded; `repointed` of them changed id.
    Loaded { repointed: usize },
    /// The persisted keymap was stale and has been erased; defaults are live.
    Regenerated,
}

/// The live keymap grid.
pub struct KeymapStore {
    registry: Arc<BehaviorRegistry>,
    dims: GridDimensions,
    defaults: Vec<KeyBinding>,
    cells: Vec<KeyBinding>,
    dirty: Vec<bool>,
    backend: Box<dyn KeymapBackend>,
}

impl KeymapStore {
    /// Creates a store holding `defaults`, clean, without touching the backend.
    ///
    /// # Errors
    ///
    /// - [`StoreError::DefaultsMismatch`] if `defaults` does not cover the grid.
    /// - [`StoreError::Validation`] if a default names an unregistered behavior.
    pub fn new(
        registry: Arc<BehaviorRegistry>,
        dims: GridDimensions,
        defaults: Vec<KeyBinding>,
        backend: Box<dyn KeymapBackend>,
    ) -> Result<Self, StoreError> {
        if defaults.len() != dims.cell_count() {
            return Err(StoreError::DefaultsMismatch {
                expected: dims.cell_count(),
                actual: defaults.len(),
            });
        }
        for binding in &defaults {
            check_registered(&registry, binding)?;
        }
        Ok(Self {
            registry,
            dims,
            cells: defaults.clone(),
            dirty: vec![false; defaults.len()],
            defaults,
            backend,
        })
    }

    pub fn dimensions(&self) -> GridDimensions {
        self.dims
    }

    pub fn registry(&self) -> &BehaviorRegistry {
        &self.registry
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// A codec bound to this store's registry.
    pub fn codec(&self) -> BindingCodec<'_> {
        BindingCodec::new(&self.registry)
    }

    /// Returns the binding at `(layer, key)`.
    ///
    /// # Errors
    ///
    /// [`ValidationError::OutOfRange`] outside the grid.
    pub fn get(&self, layer: u8, key: u8) -> Result<KeyBinding, ValidationError> {
        let idx = self.dims.index(layer, key)?;
        Ok(self.cells[idx])
    }

    /// Replaces the binding at `(layer, key)` and marks the cell dirty.
    ///
    /// # Errors
    ///
    /// [`ValidationError::OutOfRange`] outside the grid, or
    /// [`ValidationError::InvalidBehaviorId`] if the binding names a behavior
    /// the registry does not know.  Nothing changes on error.
    pub fn set(&mut self, layer: u8, key: u8, binding: KeyBinding) -> Result<(), ValidationError> {
        let idx = self.dims.index(layer, key)?;
        check_registered(&self.registry, &binding)?;
        self.cells[idx] = binding;
        self.dirty[idx] = true;
        debug!(layer, key, ?binding, "key binding updated");
        Ok(())
    }

    /// The binding at `(layer, key)` as a wire record.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub fn record_at(&self, layer: u8, key: u8) -> Result<KeyRecord, ValidationError> {
        let binding = self.get(layer, key)?;
        self.codec().to_record(&binding)
    }

    /// Decodes `record` and stores it at `(layer, key)`.
    ///
    /// # Errors
    ///
    /// [`ValidationError::InvalidBehaviorId`] for an unknown id, or
    /// [`ValidationError::OutOfRange`] outside the grid.
    pub fn set_record(
        &mut self,
        layer: u8,
        key: u8,
        record: &KeyRecord,
    ) -> Result<(), ValidationError> {
        let binding = self.codec().to_binding(record)?;
        self.set(layer, key, binding)
    }

    /// The whole grid as wire records, layer-major.
    ///
    /// # Errors
    ///
    /// Only if a cell violates the registry invariant, which `set` prevents.
    pub fn records(&self) -> Result<Vec<KeyRecord>, ValidationError> {
        let codec = self.codec();
        self.cells.iter().map(|b| codec.to_record(b)).collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.iter().any(|d| *d)
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.iter().filter(|d| **d).count()
    }

    /// Restores the configured defaults and clears all dirty state.
    pub fn reset_to_defaults(&mut self) {
        self.cells.clone_from(&self.defaults);
        self.dirty.fill(false);
    }

    /// Populates the grid from the backend.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Corruption`] if a persisted label resolves to nothing
    ///   or a cell past the probe is unreadable.
    /// - [`StoreError::Storage`] for backend failures.
    ///
    /// On error the in-memory grid is left unchanged.
    pub fn load(&mut self) -> Result<LoadOutcome, StoreError> {
        let kind = self.backend.kind();
        let registry = Arc::clone(&self.registry);
        let codec = BindingCodec::new(&registry);

        let stale = match self.backend.probe(self.dims) {
            Ok(None) => false,
            Ok(Some(first)) => !codec.stored_label_resolves(&first),
            Err(e) if e.is_undecodable() => {
                warn!(backend = %kind, error = %e, "persisted keymap is unreadable");
                true
            }
            Err(e) => return Err(e.into()),
        };

        if stale {
            warn!(backend = %kind, "persisted keymap is stale; erasing and restoring defaults");
            self.backend.erase(self.dims)?;
            self.reset_to_defaults();
            return Ok(LoadOutcome::Regenerated);
        }

        let stored = match self.backend.read_all(self.dims) {
            Ok(stored) => stored,
            Err(StorageError::UnreadableCell { layer, key, reason }) => {
                return Err(StoreError::Corruption { layer, key, reason });
            }
            Err(e) => return Err(e.into()),
        };
        if stored.iter().all(Option::is_none) {
            info!(backend = %kind, "no persisted keymap; using defaults");
            self.reset_to_defaults();
            return Ok(LoadOutcome::FirstBoot);
        }

        let mut cells = self.defaults.clone();
        let mut dirty = vec![false; cells.len()];
        let mut repointed = 0;
        for (idx, slot) in stored.into_iter().enumerate().take(cells.len()) {
            let Some(cell) = slot else { continue };
            let (binding, moved) = codec
                .repoint(&cell)
                .map_err(|_| self.corruption(idx, &cell))?;
            cells[idx] = binding;
            if moved {
                dirty[idx] = true;
                repointed += 1;
            }
        }

        self.cells = cells;
        self.dirty = dirty;
        info!(backend = %kind, repointed, "keymap loaded");
        Ok(LoadOutcome::Loaded { repointed })
    }

    /// Writes dirty cells to the backend and returns the number of backend writes.
    ///
    /// A clean store performs no backend calls at all.  Dirty state is
    /// cleared only when the backend reports success.
    ///
    /// # Errors
    ///
    /// [`StoreError::Storage`] if the backend fails; the cells stay dirty.
    pub fn flush(&mut self) -> Result<usize, StoreError> {
        let pending = self.dirty_count();
        if pending == 0 {
            debug!("flush requested with no dirty cells");
            return Ok(0);
        }

        let codec = BindingCodec::new(&self.registry);
        let stored = self
            .cells
            .iter()
            .map(|b| codec.to_stored(b))
            .collect::<Result<Vec<StoredBinding>, _>>()?;
        let writes = self.backend.persist(self.dims, &stored, &self.dirty)?;
        self.dirty.fill(false);
        info!(cells = pending, writes, "keymap flushed");
        Ok(writes)
    }

    fn corruption(&self, idx: usize, cell: &StoredBinding) -> StoreError {
        let pos = self.dims.position(idx);
        StoreError::Corruption {
            layer: pos.layer,
            key: pos.key,
            reason: format!(
                "unknown behavior {:?}",
                cell.label.as_deref().unwrap_or_default()
            ),
        }
    }
}

impl std::fmt::Debug for KeymapStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeymapStore")
            .field("dims", &self.dims)
            .field("backend", &self.backend.kind())
            .field("dirty", &self.dirty_count())
            .finish()
    }
}

fn check_registered(registry: &BehaviorRegistry, binding: &KeyBinding) -> Result<(), ValidationError> {
    match binding.behavior {
        Some(id) if !registry.contains(id) => Err(ValidationError::InvalidBehaviorId(id.0)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::persistence::MockKeymapBackend;
    use keymap_core::{BehaviorId, UNSET_BEHAVIOR_ID};

    const KEY_PRESS: BehaviorId = BehaviorId(5);
    const LAYER_TAP: BehaviorId = BehaviorId(8);

    fn dims() -> GridDimensions {
        GridDimensions::new(2, 3).unwrap()
    }

    fn defaults() -> Vec<KeyBinding> {
        (0..6)
            .map(|i| KeyBinding::new(KEY_PRESS, 0x04 + i, 0))
            .collect()
    }

    fn stored(label: &str, behavior_id: u32, param1: u32) -> StoredBinding {
        StoredBinding {
            behavior_id,
            label: Some(label.to_string()),
            param1,
            param2: 0,
        }
    }

    fn make_store(backend: MockKeymapBackend) -> KeymapStore {
        KeymapStore::new(
            Arc::new(BehaviorRegistry::builtin()),
            dims(),
            defaults(),
            Box::new(backend),
        )
        .expect("valid store")
    }

    fn quiet_backend() -> MockKeymapBackend {
        let mut backend = MockKeymapBackend::new();
        backend.expect_kind().return_const(BackendKind::Entry);
        backend
    }

    // ── get / set ─────────────────────────────────────────────────────────────

    #[test]
    fn test_get_returns_default_binding() {
        let store = make_store(quiet_backend());
        assert_eq!(store.get(1, 2), Ok(KeyBinding::new(KEY_PRESS, 0x09, 0)));
    }

    #[test]
    fn test_get_and_set_reject_boundary_indices() {
        // Arrange
        let mut store = make_store(quiet_backend());

        // Act / Assert
        assert!(matches!(store.get(2, 0), Err(ValidationError::OutOfRange { .. })));
        assert!(matches!(store.get(0, 3), Err(ValidationError::OutOfRange { .. })));
        assert!(matches!(
            store.set(2, 0, KeyBinding::unset()),
            Err(ValidationError::OutOfRange { .. })
        ));
        assert!(matches!(
            store.set(0, 3, KeyBinding::unset()),
            Err(ValidationError::OutOfRange { .. })
        ));
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_set_marks_only_that_cell_dirty() {
        let mut store = make_store(quiet_backend());

        store.set(1, 0, KeyBinding::new(LAYER_TAP, 2, 0)).unwrap();

        assert_eq!(store.get(1, 0), Ok(KeyBinding::new(LAYER_TAP, 2, 0)));
        assert_eq!(store.dirty_count(), 1);
    }

    #[test]
    fn test_set_rejects_unregistered_behavior() {
        let mut store = make_store(quiet_backend());
        let result = store.set(0, 0, KeyBinding::new(BehaviorId(400), 0, 0));
        assert_eq!(result, Err(ValidationError::InvalidBehaviorId(400)));
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_set_record_with_unset_sentinel_clears_cell() {
        let mut store = make_store(quiet_backend());
        store
            .set_record(0, 1, &KeyRecord::new(UNSET_BEHAVIOR_ID, 0, 0))
            .unwrap();
        assert!(store.get(0, 1).unwrap().is_unset());
    }

    #[test]
    fn test_new_rejects_short_defaults() {
        let result = KeymapStore::new(
            Arc::new(BehaviorRegistry::builtin()),
            dims(),
            defaults()[..4].to_vec(),
            Box::new(quiet_backend()),
        );
        assert!(matches!(
            result,
            Err(StoreError::DefaultsMismatch {
                expected: 6,
                actual: 4
            })
        ));
    }

    // ── flush ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_flush_with_no_dirty_cells_never_calls_backend() {
        // Arrange: a mock with no persist expectation panics if persist is called
        let mut backend = MockKeymapBackend::new();
        backend.expect_persist().never();
        backend.expect_erase().never();
        let mut store = make_store(backend);

        // Act
        let writes = store.flush().unwrap();

        // Assert
        assert_eq!(writes, 0);
    }

    #[test]
    fn test_flush_passes_dirty_mask_and_clears_it() {
        // Arrange
        let mut backend = quiet_backend();
        backend
            .expect_persist()
            .withf(|_, cells, dirty| {
                cells.len() == 6
                    && dirty
                        .iter()
                        .copied()
                        .eq([false, false, false, false, true, false])
                    && cells[4].label.as_deref() == Some("LAYER_TAP")
            })
            .times(1)
            .returning(|_, _, _| Ok(1));
        let mut store = make_store(backend);
        store.set(1, 1, KeyBinding::new(LAYER_TAP, 1, 0)).unwrap();

        // Act
        let writes = store.flush().unwrap();

        // Assert
        assert_eq!(writes, 1);
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_failed_flush_keeps_cells_dirty() {
        let mut backend = quiet_backend();
        backend.expect_persist().returning(|_, _, _| {
            Err(StorageError::Io {
                key: "keys/4001".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            })
        });
        let mut store = make_store(backend);
        store.set(0, 1, KeyBinding::unset()).unwrap();

        assert!(matches!(store.flush(), Err(StoreError::Storage(_))));
        assert_eq!(store.dirty_count(), 1);
    }

    // ── load ──────────────────────────────────────────────────────────────────

    #[test]
    fn test_load_with_empty_backend_is_first_boot() {
        let mut backend = quiet_backend();
        backend.expect_probe().returning(|_| Ok(None));
        backend.expect_read_all().returning(|d| Ok(vec![None; d.cell_count()]));
        let mut store = make_store(backend);

        assert_eq!(store.load().unwrap(), LoadOutcome::FirstBoot);
        assert_eq!(store.get(0, 0), Ok(defaults()[0]));
    }

    #[test]
    fn test_load_unresolvable_probe_erases_and_regenerates() {
        // Arrange
        let mut backend = quiet_backend();
        backend
            .expect_probe()
            .returning(|_| Ok(Some(stored("NOT_A_BEHAVIOR", 5, 0))));
        backend.expect_erase().times(1).returning(|_| Ok(()));
        backend.expect_read_all().never();
        let mut store = make_store(backend);
        store.set(0, 0, KeyBinding::unset()).unwrap();

        // Act
        let outcome = store.load().unwrap();

        // Assert
        assert_eq!(outcome, LoadOutcome::Regenerated);
        assert_eq!(store.get(0, 0), Ok(defaults()[0]));
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_load_undecodable_probe_is_treated_as_stale() {
        let mut backend = quiet_backend();
        backend.expect_probe().returning(|_| {
            Err(StorageError::Decode {
                key: "keys/keymap".to_string(),
                reason: "io error: unexpected end of file".to_string(),
            })
        });
        backend.expect_erase().times(1).returning(|_| Ok(()));
        let mut store = make_store(backend);

        assert_eq!(store.load().unwrap(), LoadOutcome::Regenerated);
    }

    #[test]
    fn test_load_propagates_probe_io_error() {
        let mut backend = quiet_backend();
        backend.expect_probe().returning(|_| {
            Err(StorageError::Io {
                key: "keys/4000".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            })
        });
        backend.expect_erase().never();
        let mut store = make_store(backend);

        assert!(matches!(store.load(), Err(StoreError::Storage(_))));
    }

    #[test]
    fn test_load_repoints_renumbered_labels_and_marks_them_dirty() {
        // Arrange: cell (1, 2) was persisted when LAYER_TAP had id 3
        let mut backend = quiet_backend();
        backend
            .expect_probe()
            .returning(|_| Ok(Some(stored("KEY_PRESS", 5, 0x04))));
        backend.expect_read_all().returning(|d| {
            let mut cells = vec![None; d.cell_count()];
            cells[0] = Some(stored("KEY_PRESS", 5, 0x04));
            cells[5] = Some(stored("LAYER_TAP", 3, 1));
            Ok(cells)
        });
        let mut store = make_store(backend);

        // Act
        let outcome = store.load().unwrap();

        // Assert
        assert_eq!(outcome, LoadOutcome::Loaded { repointed: 1 });
        assert_eq!(store.get(1, 2), Ok(KeyBinding::new(LAYER_TAP, 1, 0)));
        assert_eq!(store.dirty_count(), 1);
        // cells without a record keep their default
        assert_eq!(store.get(0, 1), Ok(defaults()[1]));
    }

    #[test]
    fn test_load_unresolvable_non_first_cell_is_corruption() {
        // Arrange
        let mut backend = quiet_backend();
        backend
            .expect_probe()
            .returning(|_| Ok(Some(stored("KEY_PRESS", 5, 0x04))));
        backend.expect_read_all().returning(|d| {
            let mut cells = vec![None; d.cell_count()];
            cells[0] = Some(stored("KEY_PRESS", 5, 0x04));
            cells[4] = Some(stored("REMOVED_BEHAVIOR", 40, 0));
            Ok(cells)
        });
        let mut store = make_store(backend);
        store.set(0, 2, KeyBinding::unset()).unwrap();

        // Act
        let result = store.load();

        // Assert: fatal, and the live grid is untouched
        match result {
            Err(StoreError::Corruption { layer, key, reason }) => {
                assert_eq!((layer, key), (1, 1));
                assert!(reason.contains("REMOVED_BEHAVIOR"));
            }
            other => panic!("expected corruption, got {other:?}"),
        }
        assert!(store.get(0, 2).unwrap().is_unset());
    }

    #[test]
    fn test_load_unreadable_non_first_cell_is_corruption() {
        // Arrange
        let mut backend = quiet_backend();
        backend
            .expect_probe()
            .returning(|_| Ok(Some(stored("KEY_PRESS", 5, 0x04))));
        backend.expect_read_all().returning(|_| {
            Err(StorageError::UnreadableCell {
                layer: 1,
                key: 2,
                reason: "io error: unexpected end of file".to_string(),
            })
        });
        backend.expect_erase().never();
        let mut store = make_store(backend);

        // Act
        let result = store.load();

        // Assert
        assert!(matches!(
            result,
            Err(StoreError::Corruption { layer: 1, key: 2, .. })
        ));
    }
}
