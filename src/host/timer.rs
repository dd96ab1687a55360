//! In-process OS scheduler built on tokio timers.
//!
//! Each submitted request becomes a timer task. When it fires, a `FireEvent`
//! is sent over the fire channel and a separate watcher task takes over the
//! platform side: if the engine has not reported completion within the
//! platform budget, the run is expired. Resubmitting or cancelling an
//! identifier only affects its pending timer, never a watcher.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::domain::TaskId;
use crate::error::{CadenceError, Result};
use crate::scheduler::{FireEvent, FireHandle, OsScheduler, SubmitRequest};

/// Platform budget used by the binary: a little more than the engine's own.
pub const DEFAULT_PLATFORM_BUDGET: Duration = Duration::from_secs(30);

/// Timer-backed `OsScheduler`.
#[derive(Debug)]
pub struct TimerScheduler {
    fires: mpsc::UnboundedSender<FireEvent>,
    platform_budget: Duration,
    timers: Mutex<HashMap<TaskId, AbortHandle>>,
}

impl TimerScheduler {
    /// Create a scheduler and the receiver its fire events arrive on.
    pub fn new(platform_budget: Duration) -> (Self, mpsc::UnboundedReceiver<FireEvent>) {
        let (fires, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            fires,
            platform_budget,
            timers: Mutex::new(HashMap::new()),
        };
        (scheduler, rx)
    }

    /// Number of timers that have not finished yet.
    pub fn active_timers(&self) -> usize {
        let timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        timers.values().filter(|h| !h.is_finished()).count()
    }
}

impl OsScheduler for TimerScheduler {
    fn submit(&self, request: SubmitRequest) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CadenceError::Submission(format!("no runtime for timer: {}", e)))?;

        let delay = (request.earliest_eligible - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let fires = self.fires.clone();
        let budget = self.platform_budget;
        let task_id = request.task_id.clone();

        let timer = runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let (event, fire) = FireEvent::new(task_id.clone());
            if fires.send(event).is_err() {
                tracing::debug!(task_id = %task_id, "Fire receiver gone, dropping fire");
                return;
            }
            tokio::spawn(watch_fire(task_id, fire, budget));
        });

        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = timers.insert(request.task_id, timer.abort_handle()) {
            previous.abort();
        }
        Ok(())
    }

    fn cancel(&self, task_id: &TaskId) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = timers.remove(task_id) {
            timer.abort();
        }
    }

    fn cancel_all(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, timer) in timers.drain() {
            timer.abort();
        }
    }
}

/// Wait for the engine to report a fired run, expiring it once the platform
/// budget runs out.
async fn watch_fire(task_id: TaskId, mut fire: FireHandle, budget: Duration) {
    tokio::select! {
        outcome = fire.completion() => {
            tracing::debug!(task_id = %task_id, outcome = ?outcome, "Fire completed");
        }
        _ = tokio::time::sleep(budget) => {
            tracing::warn!(task_id = %task_id, budget_secs = budget.as_secs(), "Platform budget exhausted, expiring run");
            fire.expire();
            let outcome = fire.completion().await;
            tracing::debug!(task_id = %task_id, outcome = ?outcome, "Expired fire completed");
        }
    }
}
