//! Command runner abstraction.

use async_trait::async_trait;

use crate::error::Result;

/// Output of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code.
    pub code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Options for a single command invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Text piped to the command's standard input.
    pub stdin: Option<String>,
}

impl RunOptions {
    /// Options that pipe `input` to standard input.
    #[must_use]
    pub fn with_stdin(input: impl Into<String>) -> Self {
        Self {
            stdin: Some(input.into()),
        }
    }
}

/// Runs external tools such as `docker` and `kubectl`.
///
/// A non-zero exit is reported as `ExecError::NonZeroExit` carrying the exit
/// code and both captured streams.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` with `args` and waits for it to exit.
    async fn run(&self, command: &str, args: &[String], options: &RunOptions)
        -> Result<CommandOutput>;
}

/// Renders a command line for logs and dry-run files.
#[must_use]
pub fn command_line(command: &str, args: &[String]) -> String {
    std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
