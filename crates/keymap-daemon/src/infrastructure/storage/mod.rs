//! Storage infrastructure: keymap persistence and the configuration file.
//!
//! - [`kv`] – raw key-value stores (in-memory and file-backed).
//! - [`record`] – bincode encoding of persisted cells and blobs.
//! - [`blob`] / [`entry`] – the two [`KeymapBackend`] strategies.
//! - [`config`] – TOML configuration with platform-default locations.
//!
//! [`KeymapBackend`]: crate::application::persistence::KeymapBackend

pub mod blob;
pub mod config;
pub mod entry;
pub mod kv;
pub mod record;

pub use blob::BlobBackend;
pub use entry::EntryBackend;
pub use kv::{FileStore, KeyValueStore, MemoryStore, StorageKey};
