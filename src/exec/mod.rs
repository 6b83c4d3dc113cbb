//! External command execution.
//!
//! Every side effect on a cluster or container host goes through a
//! [`CommandRunner`], so actions can be exercised without real tools.

mod process;
mod runner;
#[cfg(test)]
pub(crate) mod scripted;

pub use process::ProcessRunner;
pub use runner::{command_line, CommandOutput, CommandRunner, RunOptions};
