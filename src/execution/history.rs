//! Execution history and cumulative statistics.
//!
//! History is a bounded FIFO of `ExecutionRecord`s; stats are cumulative
//! counters that survive restarts through the state store. Both are
//! updated in the same call so they never disagree.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ExecutionRecord, TaskId};
use crate::tasks::BodyReport;

/// Default number of records kept in memory.
pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

/// Counters for one task identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskCounters {
    pub runs: u64,
    pub successes: u64,
    pub expirations: u64,
}

/// Cumulative, process-wide execution statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub expired_executions: u64,
    pub alerts_triggered: u64,
    pub per_task: BTreeMap<TaskId, TaskCounters>,
    pub last_execution: Option<DateTime<Utc>>,
}

impl Stats {
    /// successful / total, or 0 when nothing has run yet.
    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            return 0.0;
        }
        self.successful_executions as f64 / self.total_executions as f64
    }

    pub fn counters(&self, task_id: &TaskId) -> TaskCounters {
        self.per_task.get(task_id).copied().unwrap_or_default()
    }

    fn apply(&mut self, record: &ExecutionRecord, report: &BodyReport) {
        self.total_executions += 1;
        let counters = self.per_task.entry(record.task_id.clone()).or_default();
        counters.runs += 1;

        if record.success() {
            self.successful_executions += 1;
            counters.successes += 1;
            self.alerts_triggered += report.alerts_triggered as u64;
        }
        if record.expired() {
            self.expired_executions += 1;
            counters.expirations += 1;
        }
        self.last_execution = Some(record.ended_at);
    }
}

/// Bounded record of past executions plus the stats they feed.
#[derive(Debug)]
pub struct ExecutionHistory {
    records: VecDeque<ExecutionRecord>,
    capacity: usize,
    stats: Stats,
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        Self::with_stats(capacity, Stats::default())
    }

    /// Start from stats restored from the state store.
    pub fn with_stats(capacity: usize, stats: Stats) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            stats,
        }
    }

    /// Append a record, evicting the oldest beyond capacity, and update stats.
    pub fn record(&mut self, record: ExecutionRecord, report: &BodyReport) {
        self.stats.apply(&record, report);
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn success_rate(&self) -> f64 {
        self.stats.success_rate()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records oldest first.
    pub fn records(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records.iter()
    }

    /// The `n` most recent records, newest first.
    pub fn recent(&self, n: usize) -> Vec<ExecutionRecord> {
        self.records.iter().rev().take(n).cloned().collect()
    }

    pub fn last_for(&self, task_id: &TaskId) -> Option<&ExecutionRecord> {
        self.records.iter().rev().find(|r| &r.task_id == task_id)
    }
}
