//! Admission control for scheduled tasks.
//!
//! Decides whether a task may proceed given its priority tier, whether it
//! is heavy, and the current power state:
//! - Critical tasks always run
//! - Everything else stops at or below the critical threshold unless charging
//! - Low priority tasks also stop at or below the low threshold unless charging
//! - Heavy tasks need charging or a battery above the heavy threshold
//!
//! Window-gated tasks additionally need to be charging inside the optimal
//! execution window.

use std::fmt;

use crate::config::PowerConfig;
use crate::domain::{PowerState, Priority, TaskDescriptor};

/// Why admission was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    CriticalBattery,
    LowBattery,
    HeavyTaskBattery,
    OutsideQuietWindow,
    ConcurrencyLimit,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DenyReason::CriticalBattery => "battery at or below critical threshold",
            DenyReason::LowBattery => "battery at or below low threshold",
            DenyReason::HeavyTaskBattery => "battery too low for heavy task",
            DenyReason::OutsideQuietWindow => "not charging inside the quiet window",
            DenyReason::ConcurrencyLimit => "concurrent task limit reached",
        };
        f.write_str(reason)
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Deny(DenyReason),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admit)
    }
}

/// Pure admission policy over battery thresholds.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    critical_threshold: f32,
    low_threshold: f32,
    heavy_threshold: f32,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(&PowerConfig::default())
    }
}

impl AdmissionController {
    pub fn new(config: &PowerConfig) -> Self {
        Self {
            critical_threshold: config.critical_battery_threshold,
            low_threshold: config.low_battery_threshold,
            heavy_threshold: config.heavy_battery_threshold,
        }
    }

    /// Returns true if a task with this profile may run now.
    pub fn should_execute(&self, priority: Priority, is_heavy: bool, battery_level: f32, is_charging: bool) -> bool {
        self.power_check(priority, is_heavy, battery_level, is_charging).is_none()
    }

    fn power_check(&self, priority: Priority, is_heavy: bool, battery_level: f32, is_charging: bool) -> Option<DenyReason> {
        if priority.is_critical() || is_charging {
            return None;
        }
        if battery_level <= self.critical_threshold {
            return Some(DenyReason::CriticalBattery);
        }
        if priority == Priority::Low && battery_level <= self.low_threshold {
            return Some(DenyReason::LowBattery);
        }
        if is_heavy && battery_level <= self.heavy_threshold {
            return Some(DenyReason::HeavyTaskBattery);
        }
        None
    }

    /// Full admission check for a registered task.
    pub fn evaluate(&self, descriptor: &TaskDescriptor, power: PowerState, in_window: bool) -> Admission {
        if let Some(reason) =
            self.power_check(descriptor.priority, descriptor.is_heavy, power.battery_level, power.is_charging)
        {
            return Admission::Deny(reason);
        }
        if descriptor.requires_quiet_window
            && !descriptor.priority.is_critical()
            && !(power.is_charging && in_window)
        {
            return Admission::Deny(DenyReason::OutsideQuietWindow);
        }
        Admission::Admit
    }
}
