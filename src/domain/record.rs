//! Execution records: the immutable result of one task run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::TaskId;

/// Power reading taken at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerState {
    /// Battery level in [0, 1]
    pub battery_level: f32,
    pub is_charging: bool,
}

impl PowerState {
    pub fn new(battery_level: f32, is_charging: bool) -> Self {
        Self {
            battery_level: battery_level.clamp(0.0, 1.0),
            is_charging,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "lowercase")]
pub enum ExecutionOutcome {
    /// Task body returned success before the deadline
    Succeeded,
    /// Task body returned an error before the deadline
    Failed(String),
    /// Deadline or platform expiration came first
    Expired,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded)
    }
}

/// One completed or expired run of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Monotonic run time; equals the execution budget for expired runs
    pub duration: Duration,
    pub outcome: ExecutionOutcome,
    /// Power observed when the run started
    pub battery_level: f32,
    pub is_charging: bool,
}

impl ExecutionRecord {
    pub fn success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn expired(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(outcome: ExecutionOutcome) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            task_id: TaskId::from("cadence.sync"),
            started_at: now,
            ended_at: now,
            duration: Duration::from_secs(3),
            outcome,
            battery_level: 0.8,
            is_charging: false,
        }
    }

    #[test]
    fn test_power_state_clamps_level() {
        assert_eq!(PowerState::new(1.4, true).battery_level, 1.0);
        assert_eq!(PowerState::new(-0.2, false).battery_level, 0.0);
    }

    #[test]
    fn test_record_success_flag() {
        assert!(make_record(ExecutionOutcome::Succeeded).success());
        assert!(!make_record(ExecutionOutcome::Failed("boom".into())).success());
        assert!(!make_record(ExecutionOutcome::Expired).success());
    }

    #[test]
    fn test_expired_distinguished_from_failure() {
        assert!(make_record(ExecutionOutcome::Expired).expired());
        assert!(!make_record(ExecutionOutcome::Failed("boom".into())).expired());
    }

    #[test]
    fn test_outcome_serialization_shape() {
        let json = serde_json::to_value(ExecutionOutcome::Failed("timeout".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "failed", "reason": "timeout"}));
        let json = serde_json::to_value(ExecutionOutcome::Expired).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "expired"}));
    }
}
