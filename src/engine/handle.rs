//! Commands and the cloneable handle used to talk to the engine task.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::snapshot::EngineSnapshot;
use crate::domain::{TaskDescriptor, TaskId};
use crate::error::{CadenceError, Result};
use crate::scheduler::FireEvent;
use crate::tasks::TaskBody;

/// Message sent to the engine task.
pub enum EngineCommand {
    /// Register a task type.
    Register {
        descriptor: TaskDescriptor,
        body: Arc<dyn TaskBody>,
        reply: oneshot::Sender<bool>,
    },
    /// Create or replace the pending request for a task.
    Schedule {
        task_id: TaskId,
        delay: Option<Duration>,
        reply: oneshot::Sender<Result<()>>,
    },
    Enable {
        reply: oneshot::Sender<()>,
    },
    Disable {
        reply: oneshot::Sender<()>,
    },
    /// The OS scheduler fired a submitted request.
    Fire(FireEvent),
    /// Run a scheduling pass now; replies with the number submitted.
    RunPass {
        reply: oneshot::Sender<usize>,
    },
    SetQuietAnchor {
        anchor: DateTime<Utc>,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<EngineSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable handle to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub(crate) fn new(tx: mpsc::Sender<EngineCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| CadenceError::EngineStopped)?;
        rx.await.map_err(|_| CadenceError::EngineStopped)
    }

    /// Register a task type. Returns false if the identifier was already known.
    pub async fn register(&self, descriptor: TaskDescriptor, body: Arc<dyn TaskBody>) -> Result<bool> {
        self.request(|reply| EngineCommand::Register {
            descriptor,
            body,
            reply,
        })
        .await
    }

    /// Schedule a task after `delay`, or after its default delay when `None`.
    pub async fn schedule(&self, task_id: impl Into<TaskId>, delay: Option<Duration>) -> Result<()> {
        let task_id = task_id.into();
        self.request(|reply| EngineCommand::Schedule { task_id, delay, reply })
            .await?
    }

    pub async fn enable(&self) -> Result<()> {
        self.request(|reply| EngineCommand::Enable { reply }).await
    }

    pub async fn disable(&self) -> Result<()> {
        self.request(|reply| EngineCommand::Disable { reply }).await
    }

    /// Deliver a fire event. If the engine is gone the run is reported failed.
    pub async fn fire(&self, event: FireEvent) -> Result<()> {
        match self.tx.send(EngineCommand::Fire(event)).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(command)) => {
                if let EngineCommand::Fire(event) = command {
                    event.completion.complete(false);
                }
                Err(CadenceError::EngineStopped)
            }
        }
    }

    pub async fn run_pass(&self) -> Result<usize> {
        self.request(|reply| EngineCommand::RunPass { reply }).await
    }

    pub async fn set_quiet_anchor(&self, anchor: DateTime<Utc>) -> Result<()> {
        self.request(|reply| EngineCommand::SetQuietAnchor { anchor, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        self.request(|reply| EngineCommand::Snapshot { reply }).await
    }

    /// Stop the engine. Runs still in flight are reported failed.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| EngineCommand::Shutdown { reply }).await
    }

    /// Forward fire events from an OS scheduler channel into the engine.
    pub fn forward_fires(&self, mut fires: mpsc::UnboundedReceiver<FireEvent>) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            while let Some(event) = fires.recv().await {
                if handle.fire(event).await.is_err() {
                    tracing::debug!("Engine stopped, no longer forwarding fire events");
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requests_fail_when_engine_gone() {
        let (tx, rx) = mpsc::channel(4);
        let handle = EngineHandle::new(tx);
        drop(rx);

        assert!(matches!(handle.enable().await, Err(CadenceError::EngineStopped)));
        assert!(matches!(handle.snapshot().await, Err(CadenceError::EngineStopped)));
    }

    #[tokio::test]
    async fn test_fire_to_stopped_engine_reports_failure() {
        let (tx, rx) = mpsc::channel(4);
        let handle = EngineHandle::new(tx);
        drop(rx);

        let (event, mut fire) = FireEvent::new("cadence.sync");
        assert!(handle.fire(event).await.is_err());
        assert_eq!(fire.completion().await, Some(false));
    }

    #[tokio::test]
    async fn test_dropped_reply_is_engine_stopped() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = EngineHandle::new(tx);

        tokio::spawn(async move {
            // Receive and drop the command without replying
            let _ = rx.recv().await;
        });
        assert!(matches!(handle.run_pass().await, Err(CadenceError::EngineStopped)));
    }
}
