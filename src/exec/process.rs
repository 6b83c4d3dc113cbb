//! Command runner backed by real child processes.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ExecError, HerdError, Result};

use super::runner::{command_line, CommandOutput, CommandRunner, RunOptions};

/// Spawns commands with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Creates a new process runner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        options: &RunOptions,
    ) -> Result<CommandOutput> {
        let line = command_line(command, args);
        debug!("Running: {line}");

        let spawn_error = |e: std::io::Error| {
            HerdError::Exec(ExecError::Spawn {
                command: line.clone(),
                message: e.to_string(),
            })
        };

        let mut child = Command::new(command)
            .args(args)
            .stdin(if options.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        // Feed stdin while draining output; the child may exit before reading it all.
        let stdin = child.stdin.take();
        let feed = async move {
            match (stdin, options.stdin.as_deref()) {
                (Some(mut pipe), Some(input)) => pipe.write_all(input.as_bytes()).await,
                _ => Ok(()),
            }
        };
        let (written, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(spawn_error)?;

        if let Err(e) = written {
            if e.kind() == ErrorKind::BrokenPipe || !output.status.success() {
                debug!("{line} did not read all of its input: {e}");
            } else {
                return Err(spawn_error(e));
            }
        }

        let code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(HerdError::Exec(ExecError::NonZeroExit {
                command: line,
                code,
                stdout,
                stderr,
            }));
        }

        Ok(CommandOutput {
            code,
            stdout,
            stderr,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let output = ProcessRunner::new()
            .run("sh", &args(&["-c", "echo hello"]), &RunOptions::default())
            .await
            .expect("sh should run");

        assert_eq!(output.code, 0);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_pipes_stdin() {
        let output = ProcessRunner::new()
            .run("cat", &[], &RunOptions::with_stdin("kind: Service\n"))
            .await
            .expect("cat should run");

        assert_eq!(output.stdout, "kind: Service\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let err = ProcessRunner::new()
            .run(
                "sh",
                &args(&["-c", "echo out; echo err >&2; exit 3"]),
                &RunOptions::default(),
            )
            .await
            .expect_err("exit 3 should fail");

        match err {
            HerdError::Exec(ExecError::NonZeroExit {
                code,
                stdout,
                stderr,
                ..
            }) => {
                assert_eq!(code, 3);
                assert_eq!(stdout.trim(), "out");
                assert_eq!(stderr.trim(), "err");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_early_exit_keeps_exit_status() {
        let input = "x".repeat(4 * 1024 * 1024);
        let err = ProcessRunner::new()
            .run(
                "sh",
                &args(&["-c", "echo 'not found' >&2; exit 3"]),
                &RunOptions::with_stdin(input),
            )
            .await
            .expect_err("exit 3 should fail");

        assert_eq!(err.exit_code(), Some(3));
        match err {
            HerdError::Exec(ExecError::NonZeroExit { stderr, .. }) => {
                assert_eq!(stderr.trim(), "not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_large_stdin_with_large_stdout() {
        let input = "kind: ConfigMap\n".repeat(256 * 1024);
        let output = ProcessRunner::new()
            .run("cat", &[], &RunOptions::with_stdin(input.clone()))
            .await
            .expect("cat should run");

        assert_eq!(output.stdout.len(), input.len());
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let err = ProcessRunner::new()
            .run("herd-no-such-binary", &[], &RunOptions::default())
            .await
            .expect_err("spawn should fail");

        assert!(matches!(err, HerdError::Exec(ExecError::Spawn { .. })));
    }
}
