//! Shared error type and byte helpers for the report and stream codecs.
//!
//! All multi-byte integers on both wires are little-endian; the report
//! layouts are packed C structs on a little-endian microcontroller and the
//! stream frames follow the same convention.

use thiserror::Error;

/// Errors that can occur while encoding, decoding, or dispatching protocol
/// messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    ///
    /// On the stream this is recoverable: keep the bytes and wait for more.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// A report was used in a direction it does not support.
    #[error("report 0x{report_id:02X} does not support {direction} requests")]
    UnsupportedDirection {
        report_id: u8,
        direction: &'static str,
    },

    /// The report id is not one of the keymap reports.
    #[error("unknown report id: 0x{0:02X}")]
    UnknownReport(u8),

    /// The command tag is declared but has no implementation, or is unknown.
    #[error("command 0x{0:02X} is not implemented")]
    NotImplemented(u8),

    /// The payload could not be parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A frame declared a length larger than the receiver will buffer.
    #[error("frame declares {declared} bytes, limit is {max}")]
    FrameTooLarge { declared: usize, max: usize },
}

impl ProtocolError {
    /// `true` for errors that only mean "wait for more bytes".
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ProtocolError::InsufficientData { .. })
    }
}

// ── Utility helpers ───────────────────────────────────────────────────────────

pub(crate) fn require_len(buf: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::InsufficientData {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

pub(crate) fn read_u16_le(buf: &[u8], offset: usize) -> Result<u16, ProtocolError> {
    require_len(buf, offset + 2)?;
    Ok(u16::from_le_bytes([buf[offset], buf[offset + 1]]))
}

pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    require_len(buf, offset + 4)?;
    Ok(u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}
