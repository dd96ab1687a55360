//! OS-level scheduler collaborator.
//!
//! The engine hands admitted requests to the platform scheduler, which later
//! delivers a `FireEvent` back. Each fire event carries an expiration signal
//! (the platform is about to reclaim the run) and a completion sink that
//! must be resolved exactly once.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::domain::TaskId;
use crate::error::{CadenceError, Result};

/// Request submitted to the OS scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub task_id: TaskId,
    pub earliest_eligible: DateTime<Utc>,
    pub requires_network: bool,
    pub requires_external_power: bool,
}

/// Platform scheduler that fires submitted requests later.
///
/// Submitting an identifier that is already submitted replaces the earlier
/// request.
pub trait OsScheduler: Send + Sync {
    fn submit(&self, request: SubmitRequest) -> Result<()>;

    fn cancel(&self, task_id: &TaskId);

    fn cancel_all(&self);
}

/// Consumed when the run is reported, so it can only be resolved once.
#[derive(Debug)]
pub struct CompletionSink {
    tx: oneshot::Sender<bool>,
}

impl CompletionSink {
    pub fn complete(self, success: bool) {
        // The platform may have stopped listening; nothing to report then.
        let _ = self.tx.send(success);
    }
}

/// Resolves when the platform expires the run.
#[derive(Debug)]
pub struct ExpirationSignal {
    rx: oneshot::Receiver<()>,
}

impl ExpirationSignal {
    /// Wait for expiration. A dropped trigger means the run never expires.
    pub async fn expired(self) {
        if self.rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Platform side of a fire event.
#[derive(Debug)]
pub struct FireHandle {
    expire_tx: Option<oneshot::Sender<()>>,
    completion_rx: oneshot::Receiver<bool>,
}

impl FireHandle {
    /// Signal expiration to the engine. Only the first call has any effect.
    pub fn expire(&mut self) {
        if let Some(tx) = self.expire_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the engine's completion report.
    ///
    /// Returns `None` if the engine dropped the sink without reporting.
    pub async fn completion(&mut self) -> Option<bool> {
        (&mut self.completion_rx).await.ok()
    }
}

/// A task firing, delivered by the OS scheduler to the engine.
#[derive(Debug)]
pub struct FireEvent {
    pub task_id: TaskId,
    pub expiration: ExpirationSignal,
    pub completion: CompletionSink,
}

impl FireEvent {
    /// Create a fire event plus the platform-side handle that observes it.
    pub fn new(task_id: impl Into<TaskId>) -> (Self, FireHandle) {
        let (expire_tx, expire_rx) = oneshot::channel();
        let (completion_tx, completion_rx) = oneshot::channel();
        let event = Self {
            task_id: task_id.into(),
            expiration: ExpirationSignal { rx: expire_rx },
            completion: CompletionSink { tx: completion_tx },
        };
        let handle = FireHandle {
            expire_tx: Some(expire_tx),
            completion_rx,
        };
        (event, handle)
    }
}

/// In-memory OS scheduler for tests: records submissions and can be told to
/// reject them.
#[derive(Debug, Default)]
pub struct MockOsScheduler {
    submissions: Mutex<Vec<SubmitRequest>>,
    cancelled: Mutex<Vec<TaskId>>,
    cancel_all_calls: Mutex<usize>,
    reject: Mutex<bool>,
}

impl MockOsScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent submissions fail (or succeed again).
    pub fn set_reject(&self, reject: bool) {
        *self.reject.lock().unwrap_or_else(|e| e.into_inner()) = reject;
    }

    pub fn submissions(&self) -> Vec<SubmitRequest> {
        self.submissions.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn submissions_for(&self, task_id: &TaskId) -> Vec<SubmitRequest> {
        self.submissions()
            .into_iter()
            .filter(|s| &s.task_id == task_id)
            .collect()
    }

    pub fn cancelled(&self) -> Vec<TaskId> {
        self.cancelled.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn cancel_all_calls(&self) -> usize {
        *self.cancel_all_calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl OsScheduler for MockOsScheduler {
    fn submit(&self, request: SubmitRequest) -> Result<()> {
        if *self.reject.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(CadenceError::Submission(format!("quota exceeded for {}", request.task_id)));
        }
        self.submissions.lock().unwrap_or_else(|e| e.into_inner()).push(request);
        Ok(())
    }

    fn cancel(&self, task_id: &TaskId) {
        self.cancelled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task_id.clone());
    }

    fn cancel_all(&self) {
        *self.cancel_all_calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }
}
