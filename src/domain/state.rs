//! Per-identifier lifecycle state.
//!
//! Idle -> Scheduled -> Admitted -> Running -> Completed | Expired, with the
//! terminal states feeding back into Scheduled while the engine is enabled.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Registered, nothing scheduled
    Idle,
    /// Waiting for the OS scheduler to fire
    Scheduled,
    /// Fire event passed admission
    Admitted,
    /// Task body in flight
    Running,
    /// Body returned before the deadline
    Completed { success: bool },
    /// Deadline reached first
    Expired,
}

impl TaskState {
    /// Returns true for Completed and Expired
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed { .. } | TaskState::Expired)
    }

    /// Returns true if the engine may move from `self` to `next`.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (_, Idle) => true,
            (Idle, Scheduled) | (Scheduled, Scheduled) => true,
            (Scheduled, Admitted) => true,
            (Admitted, Running) => true,
            (Running, Completed { .. }) | (Running, Expired) => true,
            (s, Scheduled) if s.is_terminal() => true,
            _ => false,
        }
    }
}
