//! Built-in task types.
//!
//! | task | priority | delay | flags |
//! |---|---|---|---|
//! | `cadence.alerts` | critical | 15 min | |
//! | `cadence.analysis` | high | 5 min in session, 30 min otherwise | |
//! | `cadence.sync` | medium | 1 h | network |
//! | `cadence.maintenance` | low | 6 h | heavy, quiet window |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::services::{BodyReport, HealthServices, TaskBody};
use crate::domain::{DelayPolicy, Priority, TaskDescriptor};
use crate::error::Result;

pub const ALERTS_TASK: &str = "cadence.alerts";
pub const ANALYSIS_TASK: &str = "cadence.analysis";
pub const SYNC_TASK: &str = "cadence.sync";
pub const MAINTENANCE_TASK: &str = "cadence.maintenance";

/// The built-in task types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTask {
    Alerts,
    Analysis,
    Sync,
    Maintenance,
}

impl BuiltinTask {
    pub const ALL: [BuiltinTask; 4] = [
        BuiltinTask::Alerts,
        BuiltinTask::Analysis,
        BuiltinTask::Sync,
        BuiltinTask::Maintenance,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            BuiltinTask::Alerts => ALERTS_TASK,
            BuiltinTask::Analysis => ANALYSIS_TASK,
            BuiltinTask::Sync => SYNC_TASK,
            BuiltinTask::Maintenance => MAINTENANCE_TASK,
        }
    }

    pub fn descriptor(&self) -> TaskDescriptor {
        match self {
            BuiltinTask::Alerts => {
                TaskDescriptor::new(ALERTS_TASK, Priority::Critical, DelayPolicy::Fixed(Duration::from_secs(900)))
            }
            BuiltinTask::Analysis => TaskDescriptor::new(ANALYSIS_TASK, Priority::High, DelayPolicy::monitoring()),
            BuiltinTask::Sync => {
                TaskDescriptor::new(SYNC_TASK, Priority::Medium, DelayPolicy::Fixed(Duration::from_secs(3600)))
                    .with_network()
            }
            BuiltinTask::Maintenance => {
                TaskDescriptor::new(MAINTENANCE_TASK, Priority::Low, DelayPolicy::Fixed(Duration::from_secs(21_600)))
                    .heavy()
                    .with_quiet_window()
            }
        }
    }
}

/// Task body for a built-in task, backed by `HealthServices`.
pub struct BuiltinBody {
    task: BuiltinTask,
    services: Arc<dyn HealthServices>,
}

impl BuiltinBody {
    pub fn new(task: BuiltinTask, services: Arc<dyn HealthServices>) -> Self {
        Self { task, services }
    }
}

#[async_trait]
impl TaskBody for BuiltinBody {
    async fn run(&self) -> Result<BodyReport> {
        match self.task {
            BuiltinTask::Alerts => {
                let anomalies = self.services.run_alert_check().await?;
                for anomaly in &anomalies {
                    self.services.notify(anomaly).await?;
                }
                Ok(BodyReport {
                    alerts_triggered: anomalies.len() as u32,
                })
            }
            BuiltinTask::Analysis => {
                self.services.run_analysis().await?;
                Ok(BodyReport::default())
            }
            BuiltinTask::Sync => {
                self.services.run_sync().await?;
                Ok(BodyReport::default())
            }
            BuiltinTask::Maintenance => {
                self.services.run_maintenance().await?;
                Ok(BodyReport::default())
            }
        }
    }
}

/// Descriptors and bodies for every built-in task, ready to register.
pub fn builtin_tasks(services: Arc<dyn HealthServices>) -> Vec<(TaskDescriptor, Arc<dyn TaskBody>)> {
    BuiltinTask::ALL
        .iter()
        .map(|task| {
            let body: Arc<dyn TaskBody> = Arc::new(BuiltinBody::new(*task, services.clone()));
            (task.descriptor(), body)
        })
        .collect()
}
