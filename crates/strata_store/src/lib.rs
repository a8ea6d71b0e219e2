//! Durable key-value storage contracts and concrete stores for the Strata
//! build toolchain.
//!
//! This crate defines the [`BackingStore`] and [`AppendableBackingStore`]
//! contracts that every durable layer speaks, plus three implementations:
//! an in-memory store for tests and scratch builds, a snapshot store that
//! persists a whole map as one validated file, and a log-structured store
//! for collection values with cheap incremental append.

#![warn(missing_docs)]

pub mod checksum;
pub mod error;
pub mod log;
pub mod memory;
pub mod snapshot;
pub mod store;

pub use checksum::Checksum;
pub use error::StoreError;
pub use log::LogStore;
pub use memory::MemoryStore;
pub use snapshot::SnapshotStore;
pub use store::{AppendableBackingStore, BackingStore};
