//! Domain entities for remote keymap editing.
//!
//! This module contains pure business logic with no infrastructure dependencies.
//!
//! # What lives here?
//!
//! - **`registry`** – The immutable id ↔ label table of behaviors that can be
//!   bound to a key.  Built once at startup from configuration and shared
//!   read-only for the lifetime of the process.
//!
//! - **`grid`** – The shape of the keymap (`layers × keys_per_layer`) and the
//!   bounds checking that every read and write goes through.
//!
//! - **`binding`** – The in-memory [`binding::KeyBinding`], its wire-safe twin
//!   [`binding::KeyRecord`], the persisted [`binding::StoredBinding`], and the
//!   [`binding::BindingCodec`] converting between them.
//!
//! Code in outer layers (the daemon's store, protocol handlers, storage
//! backends) depends on the domain, but the domain never depends on them.

pub mod binding;
pub mod grid;
pub mod registry;
