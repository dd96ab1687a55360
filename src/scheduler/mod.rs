//! Scheduler module: what is pending, in which order, and when it may run.
//!
//! This module provides:
//! - **Registry**: the task types known to the engine.
//! - **Pending queue**: one pending request per task, ordered by priority
//!   tier then earliest eligible time.
//! - **Window planner**: the optimal execution window derived from the quiet
//!   anchor.
//! - **OS scheduler seam**: the platform collaborator that receives
//!   submissions and fires them later.
//!
//! # Architecture
//!
//! 1. The engine upserts a `PendingRequest` when a task is scheduled
//! 2. A scheduling pass drains the queue in priority order
//! 3. Admitted requests are submitted to the `OsScheduler`
//! 4. Denied or rejected requests stay pending for the next pass

mod os;
mod queue;
mod registry;
mod window;

pub use os::{CompletionSink, ExpirationSignal, FireEvent, FireHandle, MockOsScheduler, OsScheduler, SubmitRequest};
pub use queue::{PendingQueue, PendingRequest};
pub use registry::{RegisteredTask, TaskRegistry};
pub use window::{OptimalWindow, WindowPlanner, WindowSource};
