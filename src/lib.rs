//! Cadence - adaptive background task orchestration
//!
//! Cadence decides when, whether and under what power constraints a fixed
//! set of periodic background jobs may run. Work is prioritised, admitted
//! against the battery state and a preferred quiet window, handed to the
//! platform scheduler, and run under a per-execution time budget.

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod execution;
pub mod host;
pub mod power;
pub mod scheduler;
pub mod storage;
pub mod tasks;

pub use error::{CadenceError, Result};
