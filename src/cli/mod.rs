//! Command-line interface for convgrade.
//!
//! Provides transcript replay against configured inference/judge endpoints
//! and a configuration check.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
