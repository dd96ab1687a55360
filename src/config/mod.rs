//! Configuration system for Cadence.
//!
//! A single YAML document (~/.config/cadence/cadence.yml or .cadence.yml)
//! with one section per engine concern: engine, power, window, tasks, storage.

use eyre::Result;
use std::path::PathBuf;

pub use self::global::{
    EngineConfig, GlobalConfig, MAX_DELAY_OVERRIDE_SECS, PowerConfig, StorageConfig, TasksConfig, WindowConfig,
};

mod global;

/// Load configuration from the standard search paths.
///
/// Search order:
/// 1. Explicit path if provided
/// 2. .cadence.yml in current directory (project config)
/// 3. ~/.config/cadence/cadence.yml (user config)
/// 4. Default values
pub fn load_config(explicit_path: Option<&PathBuf>) -> Result<GlobalConfig> {
    GlobalConfig::load(explicit_path)
}
