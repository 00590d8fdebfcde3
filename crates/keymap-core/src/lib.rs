//! # keymap-core
//!
//! Shared library for the remote keymap daemon: the behavior registry, key
//! bindings and their wire records, and the codecs for both host protocols.
//!
//! It has no I/O, no async runtime, and no storage; `keymap-daemon` owns
//! those.
//!
//! # Architecture overview
//!
//! A keyboard's keymap is a grid of `layers × keys_per_layer` cells, each
//! holding a *binding*: a behavior plus two parameters.  A host tool edits
//! the grid at runtime over one of two protocols.
//!
//! - **`domain`** – The behavior registry (id ↔ label), grid geometry, and
//!   the [`BindingCodec`] that converts between in-memory bindings, wire
//!   records, and the label-carrying persisted form.
//!
//! - **`protocol`** – Byte-exact encoders and decoders: fixed-size feature
//!   reports (select a cell, read or write it, commit) and the framed
//!   command stream that dumps the whole keymap.

pub mod domain;
pub mod protocol;

pub use domain::binding::{
    BindingCodec, KeyBinding, KeyRecord, StoredBinding, ValidationError, UNSET_BEHAVIOR_ID,
};
pub use domain::grid::{GridDimensions, KeyPosition, MAX_KEYS_PER_LAYER, MAX_LAYERS};
pub use domain::registry::{BehaviorDescriptor, BehaviorId, BehaviorRegistry, RegistryError};
pub use protocol::codec::ProtocolError;
