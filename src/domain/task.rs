//! Task descriptors: one immutable description per task type.
//!
//! A descriptor says how important a task is, whether it is power hungry and
//! how long to wait between runs. It is registered once at startup and never
//! changes afterwards.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay used by session-dependent tasks while a monitoring session is active.
pub const MONITORING_ACTIVE_DELAY: Duration = Duration::from_secs(300);
/// Delay used by session-dependent tasks when no session is active.
pub const MONITORING_IDLE_DELAY: Duration = Duration::from_secs(1800);

/// Identifier of a task type, e.g. `cadence.sync`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Priority tier of a task type.
///
/// Variants are declared lowest first so the derived `Ord` sorts
/// `Critical` as the greatest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Returns true for the tier that bypasses every power check
    pub fn is_critical(&self) -> bool {
        matches!(self, Priority::Critical)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Source of the "is a monitoring session active" reading.
pub trait SessionMonitor: Send + Sync {
    fn is_session_active(&self) -> bool;
}

/// Session monitor backed by a flag that the host toggles.
#[derive(Debug, Default)]
pub struct SessionFlag {
    active: AtomicBool,
}

impl SessionFlag {
    pub fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}

impl SessionMonitor for SessionFlag {
    fn is_session_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// How long to wait before the next run of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayPolicy {
    /// Same delay every time.
    Fixed(Duration),
    /// Shorter delay while a monitoring session is active.
    SessionDependent { active: Duration, idle: Duration },
}

impl DelayPolicy {
    /// The standard monitoring cadence: 5 minutes active, 30 minutes idle.
    pub fn monitoring() -> Self {
        DelayPolicy::SessionDependent {
            active: MONITORING_ACTIVE_DELAY,
            idle: MONITORING_IDLE_DELAY,
        }
    }

    /// Resolve the delay against the current session state.
    pub fn delay(&self, session: &dyn SessionMonitor) -> Duration {
        match self {
            DelayPolicy::Fixed(delay) => *delay,
            DelayPolicy::SessionDependent { active, idle } => {
                if session.is_session_active() {
                    *active
                } else {
                    *idle
                }
            }
        }
    }
}

/// Immutable description of a task type.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub priority: Priority,
    /// Needs a higher power budget than ordinary work.
    pub is_heavy: bool,
    pub requires_network: bool,
    pub requires_external_power: bool,
    /// Only runs while charging inside the optimal execution window.
    pub requires_quiet_window: bool,
    pub delay: DelayPolicy,
}

impl TaskDescriptor {
    pub fn new(id: impl Into<TaskId>, priority: Priority, delay: DelayPolicy) -> Self {
        Self {
            id: id.into(),
            priority,
            is_heavy: false,
            requires_network: false,
            requires_external_power: false,
            requires_quiet_window: false,
            delay,
        }
    }

    /// Mark the task as heavy. Heavy tasks ask the OS scheduler for external power.
    pub fn heavy(mut self) -> Self {
        self.is_heavy = true;
        self.requires_external_power = true;
        self
    }

    pub fn with_network(mut self) -> Self {
        self.requires_network = true;
        self
    }

    pub fn with_quiet_window(mut self) -> Self {
        self.requires_quiet_window = true;
        self
    }
}
