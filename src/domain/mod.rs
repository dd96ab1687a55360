//! Domain types for Cadence
//!
//! This module contains the core domain types:
//! - TaskDescriptor: static description of one task type (priority, delay, flags)
//! - ExecutionRecord: immutable result of one run (success, failure or expiry)
//! - TaskState: per-identifier lifecycle state driven by the engine

pub mod record;
pub mod state;
pub mod task;

pub use record::{ExecutionOutcome, ExecutionRecord, PowerState};
pub use state::TaskState;
pub use task::{
    DelayPolicy, MONITORING_ACTIVE_DELAY, MONITORING_IDLE_DELAY, Priority, SessionFlag, SessionMonitor,
    TaskDescriptor, TaskId,
};
