//! Simulated collaborators for running the engine end to end.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CadenceError, Result};
use crate::tasks::{Anomaly, HealthServices};

/// `HealthServices` with fixed latency and deterministic failures.
#[derive(Debug)]
pub struct SimulatedServices {
    latency: Duration,
    /// Every Nth call fails
    fail_every: Option<u32>,
    anomalies_per_check: u32,
    calls: AtomicU32,
    notified: Mutex<Vec<Anomaly>>,
}

impl SimulatedServices {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            fail_every: None,
            anomalies_per_check: 0,
            calls: AtomicU32::new(0),
            notified: Mutex::new(Vec::new()),
        }
    }

    /// Fail every `n`th collaborator call. Zero disables failures.
    pub fn with_failure_every(mut self, n: u32) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    /// Report this many anomalies from each alert check.
    pub fn with_anomalies(mut self, count: u32) -> Self {
        self.anomalies_per_check = count;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn notified(&self) -> Vec<Anomaly> {
        self.notified.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn call(&self, operation: &str) -> Result<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.fail_every {
            Some(every) if n % every == 0 => {
                tracing::debug!(operation, call = n, "Simulated failure");
                Err(CadenceError::Collaborator(format!("simulated {} failure", operation)))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl HealthServices for SimulatedServices {
    async fn run_analysis(&self) -> Result<()> {
        self.call("analysis").await
    }

    async fn run_sync(&self) -> Result<()> {
        self.call("sync").await
    }

    async fn run_alert_check(&self) -> Result<Vec<Anomaly>> {
        self.call("alert check").await?;
        Ok((0..self.anomalies_per_check)
            .map(|i| Anomaly::new("heart_rate", format!("simulated anomaly {}", i + 1)))
            .collect())
    }

    async fn run_maintenance(&self) -> Result<()> {
        self.call("maintenance").await
    }

    async fn notify(&self, anomaly: &Anomaly) -> Result<()> {
        self.call("notify").await?;
        self.notified
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(anomaly.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let services = SimulatedServices::new(Duration::from_secs(2));
        let start = tokio::time::Instant::now();
        services.run_sync().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(services.calls(), 1);
    }

    #[tokio::test]
    async fn test_every_nth_call_fails() {
        let services = SimulatedServices::new(Duration::ZERO).with_failure_every(3);
        assert!(services.run_analysis().await.is_ok());
        assert!(services.run_sync().await.is_ok());
        assert!(matches!(services.run_maintenance().await, Err(CadenceError::Collaborator(_))));
        assert!(services.run_analysis().await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_disables_failures() {
        let services = SimulatedServices::new(Duration::ZERO).with_failure_every(0);
        for _ in 0..5 {
            assert!(services.run_sync().await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_alert_check_reports_anomalies() {
        let services = SimulatedServices::new(Duration::ZERO).with_anomalies(2);
        let anomalies = services.run_alert_check().await.unwrap();
        assert_eq!(anomalies.len(), 2);

        services.notify(&anomalies[0]).await.unwrap();
        assert_eq!(services.notified().len(), 1);
    }
}
