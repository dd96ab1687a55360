//! Power policy: battery readings and the admission decision built on them.

mod admission;
mod monitor;

pub use admission::{Admission, AdmissionController, DenyReason};
pub use monitor::{BatteryMonitor, FixedPowerMonitor};
