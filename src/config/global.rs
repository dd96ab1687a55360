//! Global configuration.
//!
//! Loaded from ~/.config/cadence/cadence.yml or .cadence.yml

use chrono::NaiveTime;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CadenceError;

/// Global configuration for Cadence.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Engine behaviour.
    pub engine: EngineConfig,

    /// Battery thresholds for admission control.
    pub power: PowerConfig,

    /// Optimal execution window.
    pub window: WindowConfig,

    /// Per-task overrides.
    pub tasks: TasksConfig,

    /// Storage settings.
    pub storage: StorageConfig,
}

impl GlobalConfig {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .cadence.yml in current directory
    /// 3. ~/.config/cadence/cadence.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(".cadence.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from .cadence.yml");
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load .cadence.yml: {}", e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("cadence").join("cadence.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(CadenceError::from)
            .context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let power = &self.power;
        for (name, value) in [
            ("power.critical-battery-threshold", power.critical_battery_threshold),
            ("power.low-battery-threshold", power.low_battery_threshold),
            ("power.heavy-battery-threshold", power.heavy_battery_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                eyre::bail!("{} must be within [0, 1], got {}", name, value);
            }
        }
        if power.critical_battery_threshold > power.low_battery_threshold {
            eyre::bail!("power.critical-battery-threshold must not exceed power.low-battery-threshold");
        }
        if self.engine.max_execution_budget_ms == 0 {
            eyre::bail!("engine.max-execution-budget-ms must be > 0");
        }
        if self.engine.max_history_size == 0 {
            eyre::bail!("engine.max-history-size must be > 0");
        }
        if self.engine.pass_interval_secs == 0 {
            eyre::bail!("engine.pass-interval-secs must be > 0");
        }
        if self.engine.max_concurrent_tasks == Some(0) {
            eyre::bail!("engine.max-concurrent-tasks must be > 0 when set");
        }
        if self.window.window_length_minutes == 0 {
            eyre::bail!("window.window-length-minutes must be > 0");
        }
        for (task_id, secs) in &self.tasks.delay_overrides {
            if *secs > MAX_DELAY_OVERRIDE_SECS {
                eyre::bail!(
                    "tasks.delay-overrides.{} must be at most {} seconds, got {}",
                    task_id,
                    MAX_DELAY_OVERRIDE_SECS,
                    secs
                );
            }
        }
        self.window.default_start_time()?;
        self.window.default_end_time()?;
        Ok(())
    }
}

/// Engine behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Whether background work is enabled at startup.
    pub enabled: bool,

    /// Hard budget for one task run in milliseconds.
    #[serde(rename = "max-execution-budget-ms")]
    pub max_execution_budget_ms: u64,

    /// Execution records kept in memory.
    #[serde(rename = "max-history-size")]
    pub max_history_size: usize,

    /// Optional cap on concurrently running task types.
    #[serde(rename = "max-concurrent-tasks")]
    pub max_concurrent_tasks: Option<usize>,

    /// Seconds between natural scheduling passes.
    #[serde(rename = "pass-interval-secs")]
    pub pass_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_execution_budget_ms: 25_000,
            max_history_size: 200,
            max_concurrent_tasks: None,
            pass_interval_secs: 900,
        }
    }
}

impl EngineConfig {
    pub fn max_execution_budget(&self) -> Duration {
        Duration::from_millis(self.max_execution_budget_ms)
    }

    pub fn pass_interval(&self) -> Duration {
        Duration::from_secs(self.pass_interval_secs)
    }
}

/// Battery thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PowerConfig {
    /// At or below this level only critical tasks run (unless charging).
    #[serde(rename = "critical-battery-threshold")]
    pub critical_battery_threshold: f32,

    /// At or below this level low priority tasks are denied (unless charging).
    #[serde(rename = "low-battery-threshold")]
    pub low_battery_threshold: f32,

    /// At or below this level heavy tasks are denied (unless charging).
    #[serde(rename = "heavy-battery-threshold")]
    pub heavy_battery_threshold: f32,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            critical_battery_threshold: 0.20,
            low_battery_threshold: 0.30,
            heavy_battery_threshold: 0.50,
        }
    }
}

/// Optimal execution window.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Start of the fallback window, local time (HH:MM).
    #[serde(rename = "default-start")]
    pub default_start: String,

    /// End of the fallback window, local time (HH:MM).
    #[serde(rename = "default-end")]
    pub default_end: String,

    /// Minutes between the quiet anchor and the window start.
    #[serde(rename = "anchor-offset-minutes")]
    pub anchor_offset_minutes: u32,

    /// Window length when derived from the quiet anchor.
    #[serde(rename = "window-length-minutes")]
    pub window_length_minutes: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            default_start: "02:00".to_string(),
            default_end: "04:00".to_string(),
            anchor_offset_minutes: 180,
            window_length_minutes: 120,
        }
    }
}

impl WindowConfig {
    pub fn default_start_time(&self) -> Result<NaiveTime> {
        parse_clock(&self.default_start).context("Invalid window.default-start")
    }

    pub fn default_end_time(&self) -> Result<NaiveTime> {
        parse_clock(&self.default_end).context("Invalid window.default-end")
    }
}

fn parse_clock(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").context(format!("expected HH:MM, got '{}'", value))
}

/// Longest accepted delay override: 30 days.
pub const MAX_DELAY_OVERRIDE_SECS: u64 = 30 * 24 * 60 * 60;

/// Per-task overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Default delay overrides in seconds, keyed by task identifier.
    #[serde(rename = "delay-overrides")]
    pub delay_overrides: HashMap<String, u64>,
}

impl TasksConfig {
    pub fn delay_override(&self, task_id: &str) -> Option<Duration> {
        self.delay_overrides.get(task_id).map(|secs| Duration::from_secs(*secs))
    }
}

/// Storage settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the persisted state blobs.
    #[serde(rename = "state-dir")]
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let default_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cadence")
            .join("state");

        Self { state_dir: default_dir }
    }
}
