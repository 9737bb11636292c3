//! Marksync Core
//!
//! Sync-domain logic shared by the Marksync server: the event/state data
//! model, deterministic conflict resolution, and per-resource event
//! optimization. This crate is pure (no I/O, no runtime) so the
//! algorithms that decide convergence can be tested in isolation from the
//! storage and transport layers.

pub mod event;
pub mod optimizer;
pub mod resolver;

pub use event::{
    DEFAULT_MAX_PAYLOAD_BYTES, EventStatus, NewSyncEvent, ResourceType, SyncAction, SyncEvent,
    SyncState, UnknownVariant, ValidationError,
};
pub use optimizer::optimize;
pub use resolver::{precedence, resolve, resolve_index};
