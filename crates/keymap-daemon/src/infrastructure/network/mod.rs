//! Network infrastructure: TCP endpoints for the two host-facing protocols.
//!
//! # Sub-modules
//!
//! - **`stream_bridge`** – Carries the framed command protocol over TCP.  One
//!   connection at a time, feeding the single command-stream worker.
//!
//! - **`report_bridge`** – Carries feature reports over TCP as small
//!   request/response frames and hands each one to the report dispatcher.

pub mod report_bridge;
pub mod stream_bridge;

pub use report_bridge::run_report_bridge;
pub use stream_bridge::run_stream_bridge;
