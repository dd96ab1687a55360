//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: run the engine with the host adapters
//! - stats: print persisted execution stats
//! - window: print the current optimal window
//! - anchor: set the quiet-period anchor

use cadence::config::MAX_DELAY_OVERRIDE_SECS;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cadence - adaptive background task orchestration
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine with simulated collaborators
    Run {
        /// How long to run, in seconds
        #[arg(short, long, default_value_t = 60)]
        duration: u64,

        /// Battery level reported by the power monitor (0.0-1.0)
        #[arg(short, long, default_value_t = 1.0, value_parser = parse_battery_level)]
        battery: f32,

        /// Report the device as charging
        #[arg(long)]
        charging: bool,

        /// Report an active monitoring session
        #[arg(short, long)]
        session_active: bool,

        /// Simulated collaborator latency in milliseconds
        #[arg(short, long, default_value_t = 200)]
        latency_ms: u64,

        /// Fail every Nth collaborator call
        #[arg(short, long)]
        fail_every: Option<u32>,

        /// Override every task's default delay, in seconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(0..=MAX_DELAY_OVERRIDE_SECS))]
        delay: Option<u64>,
    },

    /// Show persisted execution stats
    Stats {
        /// Print as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the current optimal execution window
    Window,

    /// Set the quiet-period anchor (RFC 3339 timestamp)
    Anchor {
        /// Start of the quiet period, e.g. 2026-10-18T23:00:00Z
        timestamp: String,
    },
}

fn parse_battery_level(value: &str) -> Result<f32, String> {
    let level: f32 = value.parse().map_err(|e| format!("{}", e))?;
    if !(0.0..=1.0).contains(&level) {
        return Err(format!("battery level must be within [0, 1], got {}", value));
    }
    Ok(level)
}
