//! Feature-report dispatch and the keymap report handler.
//!
//! Inbound feature reports go to a [`ReportDispatcher`], which offers each
//! one to its handlers in registration order.  A handler either claims the
//! report ([`ReportOutcome::Handled`]) or passes it on
//! ([`ReportOutcome::Bubble`]); the first claim or error stops propagation.
//!
//! [`KeymapReportHandler`] claims the four keymap reports:
//!
//! | Report     | Direction | Effect                                         |
//! |------------|-----------|------------------------------------------------|
//! | FUNCTIONS  | GET       | capability descriptor                          |
//! | KEY_SELECT | SET       | moves the cursor                               |
//! | KEY_DATA   | GET       | binding at the cursor                          |
//! | KEY_DATA   | SET       | writes the binding at the cursor (not persisted) |
//! | KEY_COMMIT | SET       | flushes the store                              |
//!
//! Any other direction fails with `UnsupportedDirection` and has no effect.

use keymap_core::protocol::report::{
    FunctionsReport, KeyCommitReport, KeyDataReport, KeySelectReport, ReportDirection, ReportId,
    PROTOCOL_REV,
};
use keymap_core::{ProtocolError, ValidationError};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::application::editor::{EditorError, SelectionCursor, SharedEditor};
use crate::application::keymap_store::StoreError;

/// One inbound feature report.
///
/// `data` always starts with the report id byte.  For GET requests it is
/// usually just that byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureReport {
    pub direction: ReportDirection,
    pub id: u8,
    pub data: Vec<u8>,
}

impl FeatureReport {
    pub fn get(id: u8) -> Self {
        Self {
            direction: ReportDirection::Get,
            id,
            data: vec![id],
        }
    }

    /// Builds a SET report from its full encoding; the id is the first byte.
    pub fn set(data: Vec<u8>) -> Option<Self> {
        let id = *data.first()?;
        Some(Self {
            direction: ReportDirection::Set,
            id,
            data,
        })
    }
}

/// Whether a handler consumed a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Claimed; the bytes are the GET response (empty for SET).
    Handled(Vec<u8>),
    /// Not for this handler; offer it to the next one.
    Bubble,
}

/// Error type for report handling.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Editor(#[from] EditorError),
}

/// A consumer of feature reports.
pub trait FeatureReportHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle(&self, report: &FeatureReport) -> Result<ReportOutcome, ReportError>;
}

/// Ordered list of report handlers.
#[derive(Default)]
pub struct ReportDispatcher {
    handlers: Vec<Box<dyn FeatureReportHandler>>,
}

impl ReportDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler; earlier handlers see reports first.
    pub fn register(&mut self, handler: Box<dyn FeatureReportHandler>) {
        debug!(handler = handler.name(), "report handler registered");
        self.handlers.push(handler);
    }

    /// Offers `report` to each handler in turn.
    ///
    /// Returns [`ReportOutcome::Bubble`] when no handler claims it.
    ///
    /// # Errors
    ///
    /// The first error raised by a handler; later handlers are not consulted.
    pub fn dispatch(&self, report: &FeatureReport) -> Result<ReportOutcome, ReportError> {
        for handler in &self.handlers {
            match handler.handle(report)? {
                ReportOutcome::Bubble => continue,
                handled => {
                    trace!(handler = handler.name(), id = report.id, "report handled");
                    return Ok(handled);
                }
            }
        }
        debug!(id = report.id, direction = %report.direction, "report not claimed");
        Ok(ReportOutcome::Bubble)
    }
}

/// Drives the keymap store from the four keymap reports.
pub struct KeymapReportHandler {
    editor: SharedEditor,
}

impl KeymapReportHandler {
    pub fn new(editor: SharedEditor) -> Self {
        Self { editor }
    }

    fn functions(&self) -> Result<Vec<u8>, ReportError> {
        let state = self.editor.lock()?;
        let dims = state.store.dimensions();
        let report = FunctionsReport {
            keycount: dims.keys_per_layer,
            layers: dims.layers,
            protocol_rev: PROTOCOL_REV,
            key_remap_support: true,
        };
        Ok(report.encode().to_vec())
    }

    fn select(&self, data: &[u8]) -> Result<Vec<u8>, ReportError> {
        let report = KeySelectReport::decode(data)?;
        let mut state = self.editor.lock()?;
        state.cursor = SelectionCursor {
            layer: report.layer_index,
            key: report.key_index,
        };
        debug!(layer = report.layer_index, key = report.key_index, "key selected");
        Ok(Vec::new())
    }

    fn read_data(&self) -> Result<Vec<u8>, ReportError> {
        let state = self.editor.lock()?;
        let SelectionCursor { layer, key } = state.cursor;
        let record = state.store.record_at(layer, key)?;
        Ok(KeyDataReport { record }.encode())
    }

    fn write_data(&self, data: &[u8]) -> Result<Vec<u8>, ReportError> {
        let report = KeyDataReport::decode(data)?;
        let mut state = self.editor.lock()?;
        let SelectionCursor { layer, key } = state.cursor;
        state.store.set_record(layer, key, &report.record)?;
        Ok(Vec::new())
    }

    fn commit(&self, data: &[u8]) -> Result<Vec<u8>, ReportError> {
        KeyCommitReport::decode(data)?;
        let mut state = self.editor.lock()?;
        let writes = state.store.flush()?;
        info!(writes, "keymap committed");
        Ok(Vec::new())
    }
}

impl FeatureReportHandler for KeymapReportHandler {
    fn name(&self) -> &'static str {
        "keymap"
    }

    fn handle(&self, report: &FeatureReport) -> Result<ReportOutcome, ReportError> {
        let Ok(id) = ReportId::try_from(report.id) else {
            return Ok(ReportOutcome::Bubble);
        };

        let response = match (id, report.direction) {
            (ReportId::Functions, ReportDirection::Get) => self.functions()?,
            (ReportId::KeySelect, ReportDirection::Set) => self.select(&report.data)?,
            (ReportId::KeyData, ReportDirection::Get) => self.read_data()?,
            (ReportId::KeyData, ReportDirection::Set) => self.write_data(&report.data)?,
            (ReportId::KeyCommit, ReportDirection::Set) => self.commit(&report.data)?,
            (id, direction) => {
                return Err(ProtocolError::UnsupportedDirection {
                    report_id: id as u8,
                    direction: direction.as_str(),
                }
                .into())
            }
        };
        Ok(ReportOutcome::Handled(response))
    }
}
