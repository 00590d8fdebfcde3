//! Infrastructure layer for the keymap daemon.
//!
//! Contains the OS-facing adapters: file and in-memory storage, the
//! channel-backed byte transport, TCP bridges, and the startup wiring that
//! assembles them from configuration.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `keymap_core`, but MUST NOT be imported by the `application` layer.

pub mod bootstrap;
pub mod network;
pub mod storage;
pub mod transport;
