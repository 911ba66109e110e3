//! Command-line interface for preview.
//!
//! Provides commands for running a render node, submitting work, inspecting
//! asset status, completing delegated renders and managing the schema.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
