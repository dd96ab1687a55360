//! In-flight executions.
//!
//! The manager enforces single-flight per task identifier and owns the
//! completion sink of each fire event until the run is recorded. The
//! `supervise` future races a task body against its deadline and the
//! platform's expiration signal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::domain::{PowerState, TaskId};
use crate::error::{CadenceError, Result};
use crate::scheduler::{CompletionSink, ExpirationSignal};
use crate::tasks::{BodyReport, TaskBody};

/// Why a run stopped being waited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiredBy {
    /// The engine's own execution budget ran out
    Deadline,
    /// The OS scheduler signalled expiration
    Platform,
}

/// Result of racing a task body against its deadline.
#[derive(Debug)]
pub enum RunResult {
    Completed(Result<BodyReport>),
    Expired(ExpiredBy),
}

/// Sent from a supervisor back to the engine when a run ends.
#[derive(Debug)]
pub struct ExecutionFinished {
    pub task_id: TaskId,
    pub execution_id: u64,
    pub result: RunResult,
    /// Monotonic time since the run started
    pub elapsed: Duration,
}

/// Live state of one in-flight run.
#[derive(Debug)]
pub struct ExecutionContext {
    pub execution_id: u64,
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
    pub deadline: Instant,
    /// Power observed when the run started
    pub power: PowerState,
    cancel: Option<AbortHandle>,
    completion: Option<CompletionSink>,
}

impl ExecutionContext {
    /// Resolve the fire event's completion sink. Later calls are no-ops.
    pub fn complete(&mut self, success: bool) {
        if let Some(sink) = self.completion.take() {
            sink.complete(success);
        }
    }

    /// Stop the supervisor. The detached task body is not interrupted.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.cancel.take() {
            handle.abort();
        }
    }
}

/// What the engine needs to start the supervisor.
#[derive(Debug, Clone)]
pub struct ExecutionTicket {
    pub execution_id: u64,
    pub task_id: TaskId,
    pub started: Instant,
    pub deadline: Instant,
}

/// Owns every in-flight execution, at most one per task identifier.
#[derive(Debug)]
pub struct ExecutionContextManager {
    budget: Duration,
    active: HashMap<TaskId, ExecutionContext>,
    next_execution_id: u64,
}

impl ExecutionContextManager {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            active: HashMap::new(),
            next_execution_id: 1,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Create a context for a fired task.
    ///
    /// Rejects the fire if the identifier already has a live context, handing
    /// the completion sink back so the caller can resolve it.
    pub fn begin(
        &mut self,
        task_id: TaskId,
        power: PowerState,
        completion: CompletionSink,
    ) -> std::result::Result<ExecutionTicket, CompletionSink> {
        if self.active.contains_key(&task_id) {
            return Err(completion);
        }

        let execution_id = self.next_execution_id;
        self.next_execution_id += 1;
        let started = Instant::now();
        let deadline = started + self.budget;

        self.active.insert(
            task_id.clone(),
            ExecutionContext {
                execution_id,
                task_id: task_id.clone(),
                started_at: Utc::now(),
                started,
                deadline,
                power,
                cancel: None,
                completion: Some(completion),
            },
        );

        Ok(ExecutionTicket {
            execution_id,
            task_id,
            started,
            deadline,
        })
    }

    /// Attach the supervisor's abort handle to a live context.
    pub fn attach(&mut self, task_id: &TaskId, execution_id: u64, handle: AbortHandle) {
        match self.active.get_mut(task_id) {
            Some(ctx) if ctx.execution_id == execution_id => ctx.cancel = Some(handle),
            _ => handle.abort(),
        }
    }

    /// Remove the context for a finished run.
    ///
    /// Returns `None` for reports from a run that is no longer current.
    pub fn finish(&mut self, task_id: &TaskId, execution_id: u64) -> Option<ExecutionContext> {
        match self.active.get(task_id) {
            Some(ctx) if ctx.execution_id == execution_id => self.active.remove(task_id),
            _ => None,
        }
    }

    pub fn is_running(&self, task_id: &TaskId) -> bool {
        self.active.contains_key(task_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn running_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.active.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Abort every supervisor and fail every outstanding completion sink.
    pub fn abort_all(&mut self) -> usize {
        let count = self.active.len();
        for (_, mut ctx) in self.active.drain() {
            ctx.cancel();
            ctx.complete(false);
        }
        count
    }
}

/// Race a task body against the deadline and the platform expiration.
///
/// The body runs as its own tokio task. When the deadline or expiration
/// wins, the body is left running detached and its eventual result is
/// discarded.
pub async fn supervise(body: Arc<dyn TaskBody>, deadline: Instant, expiration: ExpirationSignal) -> RunResult {
    let mut body_task = tokio::spawn(async move { body.run().await });

    tokio::select! {
        biased;
        joined = &mut body_task => match joined {
            Ok(result) => RunResult::Completed(result),
            Err(e) => RunResult::Completed(Err(CadenceError::Collaborator(format!("task body aborted: {}", e)))),
        },
        _ = tokio::time::sleep_until(deadline) => RunResult::Expired(ExpiredBy::Deadline),
        _ = expiration.expired() => RunResult::Expired(ExpiredBy::Platform),
    }
}
