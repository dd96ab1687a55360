//! Task bodies and the collaborators they call.
//!
//! A task body is an opaque unit of asynchronous work. The engine only
//! observes whether it succeeded, plus a small report used for specialised
//! counters (alerts triggered).

mod builtin;
mod services;

pub use builtin::{ALERTS_TASK, ANALYSIS_TASK, BuiltinBody, BuiltinTask, MAINTENANCE_TASK, SYNC_TASK, builtin_tasks};
pub use services::{Anomaly, BodyReport, HealthServices, TaskBody};
