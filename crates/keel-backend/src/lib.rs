//! Backends for Keel.
//!
//! - [`MemoryCloud`] - a deterministic in-process cloud used by tests and local runs
//! - [`MemoryStateStore`] / [`FileStateStore`] - stack state persistence

pub mod memory;
pub mod state;

pub use memory::MemoryCloud;
pub use state::{FileStateStore, MemoryStateStore};
