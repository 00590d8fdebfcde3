//! CommandSession: the framed command protocol over a raw byte transport.
//!
//! The session owns a receive buffer and an encode buffer.  Each call to
//! [`CommandSession::service`] is one read cycle: read 64-byte chunks until the
//! transport has nothing more, decoding complete commands as they appear.
//!
//! # Resynchronization
//!
//! A cycle whose very first read returns no data means the transport went
//! idle while the session was woken.  Any partial command in the buffer is
//! then considered stalled: the buffer is cleared and whatever the transport
//! still has immediately available is drained and discarded.  A declared
//! length above the frame limit clears the buffer the same way.

use std::ops::Range;

use keymap_core::protocol::frame::{
    encode_keymap_response, CommandFrame, CommandKind, KeymapPayload,
};
use keymap_core::{ProtocolError, ValidationError};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::application::editor::{EditorError, SharedEditor};

/// Bytes requested from the transport per read.
pub const READ_CHUNK: usize = 64;

/// Error type for the raw byte transport.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("transport closed")]
    Closed,

    #[error("transport cannot accept more data")]
    Backpressure,

    #[error("transport did not become ready")]
    Stalled,

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A raw, non-blocking byte transport.
pub trait Transport: Send {
    /// Prepares the transport; called once before the first read.
    fn init(&mut self) -> Result<(), LinkError>;

    /// Copies available bytes into `buf`; `Ok(0)` means nothing is available.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError>;

    /// Queues `buf` for sending and returns the number of bytes accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize, LinkError>;
}

/// Error type for a service cycle.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Editor(#[from] EditorError),

    #[error("short write: transport took {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
}

/// What one [`CommandSession::service`] cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceReport {
    pub bytes_read: usize,
    /// Commands executed successfully.
    pub commands: usize,
    /// Commands or frames rejected with a protocol error.
    pub rejected: usize,
    /// The cycle found the transport idle and reset the buffer.
    pub resynced: bool,
}

pub struct CommandSession<T: Transport> {
    transport: T,
    editor: SharedEditor,
    rx_buf: Vec<u8>,
    encode_buf: Vec<u8>,
}

impl<T: Transport> CommandSession<T> {
    pub fn new(transport: T, editor: SharedEditor) -> Self {
        Self {
            transport,
            editor,
            rx_buf: Vec::with_capacity(READ_CHUNK),
            encode_buf: Vec::new(),
        }
    }

    /// Initializes the transport.
    ///
    /// # Errors
    ///
    /// Whatever the transport's `init` returns.
    pub fn init(&mut self) -> Result<(), LinkError> {
        self.transport.init()
    }

    /// Bytes held for an incomplete command.
    pub fn buffered(&self) -> usize {
        self.rx_buf.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Runs one read cycle.
    ///
    /// # Errors
    ///
    /// Transport failures and short writes.  Protocol errors for a single
    /// command are logged and counted in [`ServiceReport::rejected`] instead.
    pub fn service(&mut self) -> Result<ServiceReport, StreamError> {
        let mut report = ServiceReport::default();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let n = self.transport.read(&mut chunk)?;
            if n == 0 {
                if report.bytes_read == 0 {
                    self.resync(&mut chunk)?;
                    report.resynced = true;
                }
                break;
            }
            report.bytes_read += n;
            self.rx_buf.extend_from_slice(&chunk[..n]);
            self.process_buffer(&mut report)?;
        }

        trace!(?report, buffered = self.rx_buf.len(), "service cycle complete");
        Ok(report)
    }

    fn process_buffer(&mut self, report: &mut ServiceReport) -> Result<(), StreamError> {
        loop {
            let frame = match CommandFrame::decode(&self.rx_buf) {
                Ok((frame, consumed)) => {
                    self.rx_buf.drain(..consumed);
                    frame
                }
                Err(e) if e.is_incomplete() => return Ok(()),
                Err(e) => {
                    warn!(error = %e, discarded = self.rx_buf.len(), "dropping undecodable stream data");
                    self.rx_buf.clear();
                    report.rejected += 1;
                    return Ok(());
                }
            };

            match self.execute(&frame) {
                Ok(()) => report.commands += 1,
                Err(StreamError::Protocol(e)) => {
                    warn!(command = frame.command, error = %e, "command rejected");
                    report.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn execute(&mut self, frame: &CommandFrame) -> Result<(), StreamError> {
        match frame.kind() {
            Some(CommandKind::ReadKeymap) => self.send_keymap(),
            Some(CommandKind::SetKeymap) | None => {
                Err(ProtocolError::NotImplemented(frame.command).into())
            }
        }
    }

    fn send_keymap(&mut self) -> Result<(), StreamError> {
        let payload = {
            let state = self.editor.lock()?;
            KeymapPayload {
                dimensions: state.store.dimensions(),
                records: state.store.records()?,
            }
        };
        let layout = encode_keymap_response(&payload, &mut self.encode_buf)?;
        self.write_range(layout.header)?;
        self.write_range(layout.payload)?;
        debug!(cells = payload.records.len(), "keymap sent");
        Ok(())
    }

    fn write_range(&mut self, range: Range<usize>) -> Result<(), StreamError> {
        let bytes = &self.encode_buf[range];
        let written = self.transport.write(bytes)?;
        if written != bytes.len() {
            return Err(StreamError::ShortWrite {
                written,
                expected: bytes.len(),
            });
        }
        Ok(())
    }

    fn resync(&mut self, scratch: &mut [u8]) -> Result<(), LinkError> {
        let stalled = self.rx_buf.len();
        self.rx_buf.clear();
        let mut drained = 0;
        loop {
            let n = self.transport.read(scratch)?;
            if n == 0 {
                break;
            }
            drained += n;
        }
        if stalled > 0 || drained > 0 {
            debug!(stalled, drained, "stream resynchronized");
        }
        Ok(())
    }
}
