//! CLI module for cadence - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running the engine
//! and inspecting its persisted state.

pub mod commands;

pub use commands::Cli;
