//! Collaborator traits for task bodies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What a task body reports back on success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyReport {
    /// Alerts raised during this run
    pub alerts_triggered: u32,
}

/// One unit of background work.
#[async_trait]
pub trait TaskBody: Send + Sync {
    /// Run to completion. Any error counts as a failed execution.
    async fn run(&self) -> Result<BodyReport>;
}

/// Something the alert check flagged for the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: String,
    pub message: String,
    pub detected_at: DateTime<Utc>,
}

impl Anomaly {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            detected_at: Utc::now(),
        }
    }
}

/// External services the built-in task bodies call.
///
/// Each call is opaque to the engine; only success or failure is observed.
#[async_trait]
pub trait HealthServices: Send + Sync {
    async fn run_analysis(&self) -> Result<()>;

    async fn run_sync(&self) -> Result<()>;

    async fn run_alert_check(&self) -> Result<Vec<Anomaly>>;

    async fn run_maintenance(&self) -> Result<()>;

    /// Deliver one alert notification.
    async fn notify(&self, anomaly: &Anomaly) -> Result<()>;
}
