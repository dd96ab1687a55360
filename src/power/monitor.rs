//! Battery monitor collaborator.

use std::sync::Mutex;

use crate::domain::PowerState;

/// Read-only source of the current power level and charging state.
///
/// Implementations must be cheap to poll; the engine reads them at every
/// scheduling pass and again when a task fires.
pub trait BatteryMonitor: Send + Sync {
    /// Battery level in [0, 1]
    fn battery_level(&self) -> f32;

    fn is_charging(&self) -> bool;

    fn snapshot(&self) -> PowerState {
        PowerState::new(self.battery_level(), self.is_charging())
    }
}

/// Battery monitor that reports whatever the host last set.
///
/// Levels are clamped to [0, 1]; NaN reads as an empty battery.
#[derive(Debug)]
pub struct FixedPowerMonitor {
    state: Mutex<PowerState>,
}

impl FixedPowerMonitor {
    pub fn new(battery_level: f32, is_charging: bool) -> Self {
        Self {
            state: Mutex::new(PowerState::new(normalize_level(battery_level), is_charging)),
        }
    }

    pub fn set(&self, battery_level: f32, is_charging: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = PowerState::new(normalize_level(battery_level), is_charging);
    }

    fn read(&self) -> PowerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn normalize_level(level: f32) -> f32 {
    if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) }
}

impl Default for FixedPowerMonitor {
    fn default() -> Self {
        Self::new(1.0, true)
    }
}

impl BatteryMonitor for FixedPowerMonitor {
    fn battery_level(&self) -> f32 {
        self.read().battery_level
    }

    fn is_charging(&self) -> bool {
        self.read().is_charging
    }

    fn snapshot(&self) -> PowerState {
        self.read()
    }
}
