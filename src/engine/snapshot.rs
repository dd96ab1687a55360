//! Read-only view of engine state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ExecutionRecord, TaskId, TaskState};
use crate::execution::Stats;
use crate::scheduler::{OptimalWindow, PendingRequest};

/// Number of history records included in a snapshot.
pub const SNAPSHOT_HISTORY_LEN: usize = 20;

/// Point-in-time copy of the engine's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub enabled: bool,
    /// Pending requests in the order they would be submitted
    pub pending: Vec<PendingRequest>,
    pub states: BTreeMap<TaskId, TaskState>,
    pub running: Vec<TaskId>,
    pub stats: Stats,
    pub success_rate: f64,
    /// Most recent records, newest first
    pub recent: Vec<ExecutionRecord>,
    pub window: OptimalWindow,
    pub quiet_anchor: Option<DateTime<Utc>>,
}

impl EngineSnapshot {
    pub fn state_of(&self, task_id: &TaskId) -> Option<TaskState> {
        self.states.get(task_id).copied()
    }

    pub fn is_pending(&self, task_id: &TaskId) -> bool {
        self.pending.iter().any(|r| &r.task_id == task_id)
    }
}
