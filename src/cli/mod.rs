//! CLI module for the herd deployment tool.
//!
//! This module provides the command-line interface for planning and
//! running deployments.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, QueueCommands, StateCommands};
pub use output::{MessageLevel, OutputFormatter};
