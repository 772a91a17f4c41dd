//! Command-line interface for containment.
//!
//! Provides the `require-image` and `exec` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
