//! Shared editing state guarded by one lock.
//!
//! The report endpoint and the command stream run on different tasks but
//! edit the same keymap, and a SELECT → DATA → COMMIT sequence reads the
//! cursor written by an earlier report.  Both the store and the cursor live
//! behind a single mutex so every report and every command observes one
//! consistent state.
//!
//! The lock is a `std::sync::Mutex`: critical sections are short and
//! synchronous, and no guard is ever held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::application::keymap_store::KeymapStore;

/// The `(layer, key)` cell targeted by KEY_DATA reports.
///
/// Not persisted; starts at `(0, 0)`.  Not range-checked when written; the
/// store rejects out-of-range cursors on use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionCursor {
    pub layer: u8,
    pub key: u8,
}

#[derive(Debug)]
pub struct EditorState {
    pub store: KeymapStore,
    pub cursor: SelectionCursor,
}

#[derive(Debug, Error, PartialEq)]
pub enum EditorError {
    /// A thread panicked while holding the editor lock.
    #[error("editor state lock poisoned")]
    Poisoned,
}

/// Cloneable handle to the single editing domain.
#[derive(Debug, Clone)]
pub struct SharedEditor {
    inner: Arc<Mutex<EditorState>>,
}

impl SharedEditor {
    pub fn new(store: KeymapStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EditorState {
                store,
                cursor: SelectionCursor::default(),
            })),
        }
    }

    /// Acquires the editor lock.
    ///
    /// # Errors
    ///
    /// [`EditorError::Poisoned`] if a previous holder panicked.
    pub fn lock(&self) -> Result<MutexGuard<'_, EditorState>, EditorError> {
        self.inner.lock().map_err(|_| EditorError::Poisoned)
    }
}
