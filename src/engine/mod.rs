//! The orchestration engine: a single-writer actor plus the handle that
//! drives it.

mod actor;
mod handle;
mod snapshot;

pub use actor::{Engine, EngineDeps};
pub use handle::{EngineCommand, EngineHandle};
pub use snapshot::{EngineSnapshot, SNAPSHOT_HISTORY_LEN};
