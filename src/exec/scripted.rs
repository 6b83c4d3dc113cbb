//! Scripted command runner for tests.
//!
//! Responses are consumed in order; once the script is exhausted every
//! further call succeeds with empty output.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{ExecError, HerdError, Result};

use super::runner::{command_line, CommandOutput, CommandRunner, RunOptions};

/// A scripted response.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Exit 0 with the given stdout.
    Ok(String),
    /// Exit non-zero.
    Fail {
        /// Exit code.
        code: i32,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
}

impl Scripted {
    /// Successful response with empty output.
    pub fn ok() -> Self {
        Self::Ok(String::new())
    }

    /// Failed response with the given exit code and stderr.
    pub fn fail(code: i32, stderr: &str) -> Self {
        Self::Fail {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Program name.
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Piped standard input.
    pub stdin: Option<String>,
}

impl RecordedCall {
    /// The full command line.
    pub fn line(&self) -> String {
        command_line(&self.command, &self.args)
    }
}

/// Runner that replays a script and records every call.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    /// Creates a runner that answers with `script`, in order.
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Command lines of every call made so far.
    pub fn lines(&self) -> Vec<String> {
        self.calls().iter().map(RecordedCall::line).collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        options: &RunOptions,
    ) -> Result<CommandOutput> {
        self.calls.lock().expect("calls lock").push(RecordedCall {
            command: command.to_string(),
            args: args.to_vec(),
            stdin: options.stdin.clone(),
        });

        let next = self.script.lock().expect("script lock").pop_front();
        match next.unwrap_or_else(Scripted::ok) {
            Scripted::Ok(stdout) => Ok(CommandOutput {
                code: 0,
                stdout,
                stderr: String::new(),
            }),
            Scripted::Fail {
                code,
                stdout,
                stderr,
            } => Err(HerdError::Exec(ExecError::NonZeroExit {
                command: command_line(command, args),
                code,
                stdout,
                stderr,
            })),
        }
    }
}
