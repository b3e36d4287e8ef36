//! Command-line interface for scriptsmith.
//!
//! Provides the `run` command driving a full synthesis run, and `env` for
//! inspecting the runtime environment profile.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
