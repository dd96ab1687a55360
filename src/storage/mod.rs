//! Persistence for Cadence - a small key-value store for engine state.
//!
//! The engine persists two values: cumulative execution stats and the
//! quiet-period anchor. Both are stored as JSON blobs under fixed keys.

mod json;
mod memory;
mod traits;

pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use traits::{QUIET_ANCHOR_KEY, STATS_KEY, StateStore, load_typed, save_typed};
