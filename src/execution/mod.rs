//! Execution tracking: in-flight contexts, history and statistics.

mod context;
mod history;

pub use context::{
    ExecutionContext, ExecutionContextManager, ExecutionFinished, ExecutionTicket, ExpiredBy, RunResult, supervise,
};
pub use history::{DEFAULT_HISTORY_CAPACITY, ExecutionHistory, Stats, TaskCounters};
