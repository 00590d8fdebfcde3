//! Stream framing for the command protocol.
//!
//! # Wire format
//!
//! ```text
//! command frame  [command: u8][reserved: u8][length: u16 LE][length bytes]
//! payload frame  [id: u16 LE][length: u16 LE][length bytes]
//! keymap data    [layers: u8][keys_per_layer: u8][KeyRecord × layers·keys]
//! ```
//!
//! A `READ_KEYMAP` response is a command header whose `length` equals the
//! size of the payload frame that follows it.  The response is built payload
//! first in one buffer and the header appended after it, so the caller must
//! send the header range before the payload range.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::domain::binding::KeyRecord;
use crate::domain::grid::GridDimensions;
use crate::protocol::codec::{read_u16_le, require_len, ProtocolError};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Bytes needed before a command decode attempt is meaningful.
pub const COMMAND_HEADER_SIZE: usize = 4;

pub const PAYLOAD_HEADER_SIZE: usize = 4;

/// Largest command body the decoder will buffer.
pub const MAX_COMMAND_PAYLOAD: usize = 1024;

/// Payload frame id of a full keymap dump.
pub const KEYMAP_PAYLOAD_ID: u16 = 0x0001;

const KEYMAP_DATA_PREFIX: usize = 2;

/// Largest grid whose `READ_KEYMAP` response still fits the `u16` length of
/// the command header.
pub const MAX_KEYMAP_CELLS: usize = (u16::MAX as usize - PAYLOAD_HEADER_SIZE - KEYMAP_DATA_PREFIX)
    / KeyRecord::WIRE_SIZE;

/// Command discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandKind {
    ReadKeymap = 0x01,
    /// Declared by the protocol; the daemon answers `NotImplemented`.
    SetKeymap = 0x02,
}

impl CommandKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(CommandKind::ReadKeymap),
            0x02 => Some(CommandKind::SetKeymap),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

// ── Command frames ────────────────────────────────────────────────────────────

/// The fixed four-byte command header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandHeader {
    pub command: u8,
    pub length: u16,
}

impl CommandHeader {
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.command);
        buf.push(0);
        buf.extend_from_slice(&self.length.to_le_bytes());
    }

    /// # Errors
    ///
    /// [`ProtocolError::InsufficientData`] if fewer than
    /// [`COMMAND_HEADER_SIZE`] bytes are available.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        require_len(bytes, COMMAND_HEADER_SIZE)?;
        Ok(Self {
            command: bytes[0],
            length: read_u16_le(bytes, 2)?,
        })
    }
}

/// A complete command: header tag plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub command: u8,
    pub payload: Vec<u8>,
}

impl CommandFrame {
    pub fn new(kind: CommandKind, payload: Vec<u8>) -> Self {
        Self {
            command: kind.tag(),
            payload,
        }
    }

    pub fn kind(&self) -> Option<CommandKind> {
        CommandKind::from_tag(self.command)
    }

    /// Encodes header and body.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::FrameTooLarge`] if the body exceeds
    /// [`MAX_COMMAND_PAYLOAD`].
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.payload.len() > MAX_COMMAND_PAYLOAD {
            return Err(ProtocolError::FrameTooLarge {
                declared: self.payload.len(),
                max: MAX_COMMAND_PAYLOAD,
            });
        }
        let mut buf = Vec::with_capacity(COMMAND_HEADER_SIZE + self.payload.len());
        CommandHeader {
            command: self.command,
            length: self.payload.len() as u16,
        }
        .encode_into(&mut buf);
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes one command from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::InsufficientData`] while the header or body is
    ///   still incomplete; keep the bytes and retry after the next read.
    /// - [`ProtocolError::FrameTooLarge`] if the declared length exceeds
    ///   [`MAX_COMMAND_PAYLOAD`].
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let header = CommandHeader::decode(buf)?;
        let length = header.length as usize;
        if length > MAX_COMMAND_PAYLOAD {
            return Err(ProtocolError::FrameTooLarge {
                declared: length,
                max: MAX_COMMAND_PAYLOAD,
            });
        }
        let total = COMMAND_HEADER_SIZE + length;
        require_len(buf, total)?;
        let frame = Self {
            command: header.command,
            payload: buf[COMMAND_HEADER_SIZE..total].to_vec(),
        };
        Ok((frame, total))
    }
}

// ── Payload frames ────────────────────────────────────────────────────────────

/// A numbered, length-prefixed byte array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFrame {
    pub id: u16,
    pub data: Vec<u8>,
}

impl PayloadFrame {
    pub fn encoded_len(&self) -> usize {
        PAYLOAD_HEADER_SIZE + self.data.len()
    }

    /// # Errors
    ///
    /// [`ProtocolError::MalformedPayload`] if the data does not fit a `u16`
    /// length.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let length = u16::try_from(self.data.len()).map_err(|_| {
            ProtocolError::MalformedPayload(format!(
                "payload of {} bytes exceeds the u16 length field",
                self.data.len()
            ))
        })?;
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&self.data);
        Ok(())
    }

    /// Decodes one payload frame from the front of `buf`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InsufficientData`] if the frame is incomplete.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), ProtocolError> {
        require_len(buf, PAYLOAD_HEADER_SIZE)?;
        let id = read_u16_le(buf, 0)?;
        let length = read_u16_le(buf, 2)? as usize;
        let total = PAYLOAD_HEADER_SIZE + length;
        require_len(buf, total)?;
        let frame = Self {
            id,
            data: buf[PAYLOAD_HEADER_SIZE..total].to_vec(),
        };
        Ok((frame, total))
    }
}

// ── Keymap payload ────────────────────────────────────────────────────────────

/// The whole grid as wire records, layer-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeymapPayload {
    pub dimensions: GridDimensions,
    pub records: Vec<KeyRecord>,
}

impl KeymapPayload {
    pub fn to_data(&self) -> Vec<u8> {
        let mut data =
            Vec::with_capacity(KEYMAP_DATA_PREFIX + self.records.len() * KeyRecord::WIRE_SIZE);
        data.push(self.dimensions.layers);
        data.push(self.dimensions.keys_per_layer);
        for record in &self.records {
            record.write_to(&mut data);
        }
        data
    }

    pub fn to_frame(&self) -> PayloadFrame {
        PayloadFrame {
            id: KEYMAP_PAYLOAD_ID,
            data: self.to_data(),
        }
    }

    /// Parses keymap data produced by [`to_data`](Self::to_data).
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MalformedPayload`] for impossible dimensions or a
    /// record count that does not match them.
    pub fn from_data(data: &[u8]) -> Result<Self, ProtocolError> {
        require_len(data, KEYMAP_DATA_PREFIX)?;
        let dimensions = GridDimensions::new(data[0], data[1])
            .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;
        let body = &data[KEYMAP_DATA_PREFIX..];
        let expected = dimensions.cell_count() * KeyRecord::WIRE_SIZE;
        if body.len() != expected {
            return Err(ProtocolError::MalformedPayload(format!(
                "keymap body is {} bytes, {}x{} grid needs {expected}",
                body.len(),
                dimensions.layers,
                dimensions.keys_per_layer
            )));
        }
        let records = body
            .chunks_exact(KeyRecord::WIRE_SIZE)
            .filter_map(KeyRecord::read_from)
            .collect();
        Ok(Self {
            dimensions,
            records,
        })
    }
}

/// Byte ranges of an encoded `READ_KEYMAP` response inside its buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLayout {
    pub header: Range<usize>,
    pub payload: Range<usize>,
}

/// Encodes a `READ_KEYMAP` response into `buf` (cleared first).
///
/// The payload frame is written at offset 0 and the command header after it;
/// transmit `buf[layout.header]` before `buf[layout.payload]`.
///
/// # Errors
///
/// [`ProtocolError::MalformedPayload`] if the grid exceeds
/// [`MAX_KEYMAP_CELLS`].
pub fn encode_keymap_response(
    payload: &KeymapPayload,
    buf: &mut Vec<u8>,
) -> Result<ResponseLayout, ProtocolError> {
    buf.clear();
    let frame = payload.to_frame();
    frame.encode_into(buf)?;
    let payload_len = buf.len();
    let length = u16::try_from(payload_len).map_err(|_| {
        ProtocolError::MalformedPayload(format!(
            "keymap response of {payload_len} bytes exceeds the u16 length field"
        ))
    })?;
    CommandHeader {
        command: CommandKind::ReadKeymap.tag(),
        length,
    }
    .encode_into(buf);
    tracing::trace!(payload_len, "encoded keymap response");
    Ok(ResponseLayout {
        header: payload_len..buf.len(),
        payload: 0..payload_len,
    })
}
