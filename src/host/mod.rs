//! Host adapters used by the binary: a timer-based OS scheduler and
//! simulated collaborators.

mod simulated;
mod timer;

pub use simulated::SimulatedServices;
pub use timer::{DEFAULT_PLATFORM_BUDGET, TimerScheduler};
