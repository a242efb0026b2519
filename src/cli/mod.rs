//! Command-line interface for lead-sniper.
//!
//! Provides commands for single runs, the trigger server, the schedule
//! daemon and configuration checks.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
