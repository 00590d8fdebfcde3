//! Startup wiring.
//!
//! Turns an [`AppConfig`] into the live pieces the daemon runs on: the
//! persistence backend, the loaded keymap behind a [`SharedEditor`], and the
//! report dispatcher.  Repointed bindings found during load are written back
//! before the editor is handed out, so a restart never repeats the repoint.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::application::editor::SharedEditor;
use crate::application::keymap_store::{KeymapStore, LoadOutcome, StoreError};
use crate::application::persistence::{BackendKind, KeymapBackend};
use crate::application::report_handler::{KeymapReportHandler, ReportDispatcher};
use crate::infrastructure::storage::config::{ConfigError, KeymapConfig, StorageConfig};
use crate::infrastructure::storage::{
    BlobBackend, EntryBackend, FileStore, KeyValueStore, MemoryStore,
};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("keymap store failed to start: {0}")]
    Store(#[from] StoreError),
}

/// Wraps `store` in the backend strategy named by `kind`.
pub fn backend_for<S>(kind: BackendKind, store: S) -> Box<dyn KeymapBackend>
where
    S: KeyValueStore + 'static,
{
    match kind {
        BackendKind::Blob => Box::new(BlobBackend::new(store)),
        BackendKind::Entry => Box::new(EntryBackend::new(store)),
    }
}

/// Opens the configured backend.  Without a `path`, records live in memory
/// and are lost on exit.
pub fn open_backend(storage: &StorageConfig) -> Box<dyn KeymapBackend> {
    match &storage.path {
        Some(root) => {
            info!(backend = %storage.backend, path = %root.display(), "opening keymap storage");
            backend_for(storage.backend, FileStore::new(root))
        }
        None => {
            warn!(backend = %storage.backend, "no storage path; keymap edits will not survive a restart");
            backend_for(storage.backend, MemoryStore::new())
        }
    }
}

/// Builds and loads the keymap store.
///
/// # Errors
///
/// - [`BootstrapError::Config`] for invalid dimensions, behavior tables, or
///   default bindings.
/// - [`BootstrapError::Store`] for corrupt persisted data or backend failures.
pub fn build_editor(
    keymap: &KeymapConfig,
    backend: Box<dyn KeymapBackend>,
) -> Result<(SharedEditor, LoadOutcome), BootstrapError> {
    let dims = keymap.dimensions()?;
    let registry = Arc::new(keymap.registry()?);
    let defaults = keymap.default_bindings(&registry, dims)?;

    let mut store = KeymapStore::new(registry, dims, defaults, backend)?;
    let outcome = store.load()?;
    if store.is_dirty() {
        let writes = store.flush()?;
        info!(writes, "repointed bindings persisted");
    }

    info!(
        layers = dims.layers,
        keys_per_layer = dims.keys_per_layer,
        backend = %store.backend_kind(),
        ?outcome,
        "keymap ready"
    );
    Ok((SharedEditor::new(store), outcome))
}

/// A dispatcher with the keymap handler registered.
pub fn build_dispatcher(editor: SharedEditor) -> ReportDispatcher {
    let mut dispatcher = ReportDispatcher::new();
    dispatcher.register(Box::new(KeymapReportHandler::new(editor)));
    dispatcher
}

// ── Tests ─────────────────────────────────────────────────────────────────────
