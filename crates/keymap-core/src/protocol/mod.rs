//! Wire codecs for the two host-facing protocols.
//!
//! - [`report`]: the discrete feature-report micro-protocol (FUNCTIONS,
//!   KEY_SELECT, KEY_DATA, KEY_COMMIT).
//! - [`frame`]: the length-prefixed command stream (`READ_KEYMAP`,
//!   `SET_KEYMAP`).

pub mod codec;
pub mod frame;
pub mod report;

pub use codec::ProtocolError;
pub use frame::{
    encode_keymap_response, CommandFrame, CommandHeader, CommandKind, KeymapPayload,
    PayloadFrame, ResponseLayout,
};
pub use report::{
    FunctionsReport, KeyCommitReport, KeyDataReport, KeySelectReport, ReportDirection, ReportId,
};
