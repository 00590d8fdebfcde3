//! Feature-report micro-protocol: fixed-layout request/response units.
//!
//! Wire layouts (packed, little-endian, report id first):
//!
//! ```text
//! FUNCTIONS  (0x04) [id][keycount][layers][protocol_rev][flags]       5 bytes
//! KEY_SELECT (0x05) [id][layer_index][key_index]                      3 bytes
//! KEY_DATA   (0x06) [id][behavior_id:4][param1:4][param2:4]          13 bytes
//! KEY_COMMIT (0x07) [id]                                              1 byte
//! ```
//!
//! `flags` bit 0 is `key_remap_support`; bits 1–7 are reserved and sent as 0.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::binding::KeyRecord;
use crate::protocol::codec::{read_u32_le, require_len, ProtocolError};

// ── Protocol constants ────────────────────────────────────────────────────────

pub const REPORT_ID_FUNCTIONS: u8 = 0x04;
pub const REPORT_ID_KEY_SELECT: u8 = 0x05;
pub const REPORT_ID_KEY_DATA: u8 = 0x06;
pub const REPORT_ID_KEY_COMMIT: u8 = 0x07;

/// Revision of the report protocol advertised in FUNCTIONS.
pub const PROTOCOL_REV: u8 = 0x01;

const REMAP_SUPPORT_BIT: u8 = 0b0000_0001;

/// Direction of a feature report, from the host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReportDirection {
    /// Host writes data to the device.
    Set = 0x00,
    /// Host reads data from the device.
    Get = 0x01,
}

impl ReportDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportDirection::Set => "SET",
            ReportDirection::Get => "GET",
        }
    }
}

impl fmt::Display for ReportDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for ReportDirection {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(ReportDirection::Set),
            0x01 => Ok(ReportDirection::Get),
            _ => Err(()),
        }
    }
}

/// The four keymap report identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReportId {
    Functions = REPORT_ID_FUNCTIONS,
    KeySelect = REPORT_ID_KEY_SELECT,
    KeyData = REPORT_ID_KEY_DATA,
    KeyCommit = REPORT_ID_KEY_COMMIT,
}

impl TryFrom<u8> for ReportId {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            REPORT_ID_FUNCTIONS => Ok(ReportId::Functions),
            REPORT_ID_KEY_SELECT => Ok(ReportId::KeySelect),
            REPORT_ID_KEY_DATA => Ok(ReportId::KeyData),
            REPORT_ID_KEY_COMMIT => Ok(ReportId::KeyCommit),
            other => Err(ProtocolError::UnknownReport(other)),
        }
    }
}

// ── Report payloads ───────────────────────────────────────────────────────────

/// FUNCTIONS (0x04): capability descriptor returned to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionsReport {
    /// Number of keys per layer.
    pub keycount: u8,
    /// Number of layers.
    pub layers: u8,
    pub protocol_rev: u8,
    pub key_remap_support: bool,
}

impl FunctionsReport {
    pub const WIRE_SIZE: usize = 5;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let flags = if self.key_remap_support {
            REMAP_SUPPORT_BIT
        } else {
            0
        };
        [
            REPORT_ID_FUNCTIONS,
            self.keycount,
            self.layers,
            self.protocol_rev,
            flags,
        ]
    }

    /// # Errors
    ///
    /// [`ProtocolError::InsufficientData`] for short input and
    /// [`ProtocolError::MalformedPayload`] for a foreign report id.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        expect_report(bytes, REPORT_ID_FUNCTIONS, Self::WIRE_SIZE)?;
        Ok(Self {
            keycount: bytes[1],
            layers: bytes[2],
            protocol_rev: bytes[3],
            key_remap_support: bytes[4] & REMAP_SUPPORT_BIT != 0,
        })
    }
}

/// KEY_SELECT (0x05): moves the selection cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySelectReport {
    pub layer_index: u8,
    pub key_index: u8,
}

impl KeySelectReport {
    pub const WIRE_SIZE: usize = 3;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        [REPORT_ID_KEY_SELECT, self.layer_index, self.key_index]
    }

    /// # Errors
    ///
    /// Same as [`FunctionsReport::decode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        expect_report(bytes, REPORT_ID_KEY_SELECT, Self::WIRE_SIZE)?;
        Ok(Self {
            layer_index: bytes[1],
            key_index: bytes[2],
        })
    }
}

/// KEY_DATA (0x06): one binding as a wire record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDataReport {
    pub record: KeyRecord,
}

impl KeyDataReport {
    pub const WIRE_SIZE: usize = 1 + KeyRecord::WIRE_SIZE;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::WIRE_SIZE);
        buf.push(REPORT_ID_KEY_DATA);
        self.record.write_to(&mut buf);
        buf
    }

    /// # Errors
    ///
    /// Same as [`FunctionsReport::decode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        expect_report(bytes, REPORT_ID_KEY_DATA, Self::WIRE_SIZE)?;
        Ok(Self {
            record: KeyRecord {
                behavior_id: read_u32_le(bytes, 1)?,
                param1: read_u32_le(bytes, 5)?,
                param2: read_u32_le(bytes, 9)?,
            },
        })
    }
}

/// KEY_COMMIT (0x07): asks the device to persist pending edits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCommitReport;

impl KeyCommitReport {
    pub const WIRE_SIZE: usize = 1;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        [REPORT_ID_KEY_COMMIT]
    }

    /// # Errors
    ///
    /// Same as [`FunctionsReport::decode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        expect_report(bytes, REPORT_ID_KEY_COMMIT, Self::WIRE_SIZE)?;
        Ok(Self)
    }
}

fn expect_report(bytes: &[u8], report_id: u8, size: usize) -> Result<(), ProtocolError> {
    require_len(bytes, size)?;
    if bytes[0] != report_id {
        return Err(ProtocolError::MalformedPayload(format!(
            "expected report 0x{report_id:02X}, found 0x{:02X}",
            bytes[0]
        )));
    }
    Ok(())
}
