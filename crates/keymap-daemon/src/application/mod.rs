//! Application layer use cases for the keymap daemon.
//!
//! The application layer sits between the domain types in `keymap_core` and
//! the infrastructure (files, sockets, channels).  Everything here depends on
//! traits ([`persistence::KeymapBackend`], [`command_stream::Transport`],
//! [`report_handler::FeatureReportHandler`]) rather than concrete adapters,
//! and performs no I/O of its own.
//!
//! # Sub-modules
//!
//! - **`persistence`**    – The backend contract the keymap store drives.
//!
//! - **`keymap_store`**   – The live grid: bounds-checked get/set, dirty
//!   tracking, boot-time load with stale detection and repointing, flush.
//!
//! - **`editor`**         – The store plus the selection cursor behind one
//!   lock, shared by both host protocols.
//!
//! - **`report_handler`** – The feature-report dispatcher and the handler for
//!   the four keymap reports.
//!
//! - **`command_stream`** – The framed command protocol over a byte transport.

pub mod command_stream;
pub mod editor;
pub mod keymap_store;
pub mod persistence;
pub mod report_handler;
