//! Error types for the herd deployment system.
//!
//! This module provides the error hierarchy for every stage of a deployment:
//! configuration, state tracking, external command execution, document
//! handling, and the actions that tie them together.

use thiserror::Error;

/// The main error type for the herd deployment system.
#[derive(Debug, Error)]
pub enum HerdError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// External command errors.
    #[error("Command error: {0}")]
    Exec(#[from] ExecError),

    /// Deployment action errors.
    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    /// Kubernetes document errors.
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
///
/// These are raised before any external call is made and are never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A branch deployment was requested without a TTL.
    #[error("Branch deployment requires ttl hours to be set")]
    MissingTtl,

    /// A branch deployment was requested without a branch name.
    #[error("Branch deployment requires a branch name")]
    MissingBranchName,

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// A configuration value could not be interpreted.
    #[error("Invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        /// Name of the setting.
        name: String,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A configuration source could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// The storage backend rejected an operation.
    #[error("State backend error: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },

    /// Stored state is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },
}

/// Errors from running an external tool such as `docker` or `kubectl`.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The process could not be started.
    #[error("Failed to spawn '{command}': {message}")]
    Spawn {
        /// The command that failed to start.
        command: String,
        /// Description of the spawn failure.
        message: String,
    },

    /// The process exited with a non-zero status.
    #[error("'{command}' exited with code {code}: {}", .stderr.trim())]
    NonZeroExit {
        /// The full command line.
        command: String,
        /// Exit code (`-1` when terminated by a signal).
        code: i32,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
}

/// Errors raised by deployment actions.
#[derive(Debug, Error)]
pub enum ActionError {
    /// A stateful action was executed before its prior state was attached.
    #[error("Action '{identifier}' executed without attached deployment state")]
    StateNotAttached {
        /// Identifier of the action.
        identifier: String,
    },

    /// An action was built without a required field.
    #[error("{action} action is missing required field '{field}'")]
    MissingField {
        /// Kind of action being built.
        action: String,
        /// Name of the missing field.
        field: String,
    },

    /// The external command behind an action failed.
    #[error("Failed to {operation} '{identifier}' from {origin} (exit code {code}): {}", .stderr.trim())]
    ExecutionFailed {
        /// Operation being performed.
        operation: String,
        /// Identifier of the action.
        identifier: String,
        /// Provenance of the action.
        origin: String,
        /// The payload that was sent to the external tool.
        descriptor: String,
        /// Exit code of the external tool.
        code: i32,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The action ran but its state could not be recorded.
    #[error("'{identifier}' from {origin} was deployed but failed to save state: {source}")]
    StateSaveFailed {
        /// Provenance of the action.
        origin: String,
        /// Identifier of the action.
        identifier: String,
        /// The underlying backend error.
        #[source]
        source: Box<HerdError>,
    },

    /// A rollout did not complete; an undo was attempted.
    #[error("Rollout of {target} failed with exit code {code}{}", undo_note(.undo_failure.as_deref()))]
    RolloutFailed {
        /// `namespace/Kind/name` of the rollout.
        target: String,
        /// Exit code of the rollout status command.
        code: i32,
        /// Captured standard error of the status command.
        stderr: String,
        /// Description of the undo failure, if the undo failed too.
        undo_failure: Option<String>,
    },
}

/// Kubernetes document errors.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// A document could not be parsed.
    #[error("Failed to parse manifest{}: {message}", origin_note(.origin.as_deref()))]
    Parse {
        /// Description of the parse error.
        message: String,
        /// Where the manifest came from.
        origin: Option<String>,
    },

    /// A document could not be serialized.
    #[error("Failed to serialize manifest: {message}")]
    Serialize {
        /// Description of the serialization error.
        message: String,
    },

    /// A document has no `kind`.
    #[error("Manifest document #{index} has no kind")]
    MissingKind {
        /// Position of the document in the manifest.
        index: usize,
    },
}

fn origin_note(origin: Option<&str>) -> String {
    origin.map(|o| format!(" from {o}")).unwrap_or_default()
}

fn undo_note(undo_failure: Option<&str>) -> String {
    undo_failure.map_or_else(
        || String::from("; rollout undo was issued"),
        |failure| format!("; rollout undo also failed: {failure}"),
    )
}

/// Result type alias for herd operations.
pub type Result<T> = std::result::Result<T, HerdError>;

impl HerdError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the exit code of the external command behind this error, if any.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exec(ExecError::NonZeroExit { code, .. })
            | Self::Action(
                ActionError::ExecutionFailed { code, .. } | ActionError::RolloutFailed { code, .. },
            ) => Some(*code),
            _ => None,
        }
    }

    /// Returns captured standard output of the failed command, if any.
    #[must_use]
    pub fn captured_stdout(&self) -> Option<&str> {
        match self {
            Self::Exec(ExecError::NonZeroExit { stdout, .. })
            | Self::Action(ActionError::ExecutionFailed { stdout, .. }) => Some(stdout),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid(
        name: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl StateError {
    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl DocumentError {
    /// Creates a parse error.
    #[must_use]
    pub fn parse(message: impl Into<String>, origin: Option<&str>) -> Self {
        Self::Parse {
            message: message.into(),
            origin: origin.map(String::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollout_error_names_undo_failure() {
        let err = ActionError::RolloutFailed {
            target: String::from("prod/Deployment/api"),
            code: 1,
            stderr: String::from("timed out"),
            undo_failure: Some(String::from("exit code 5: no rollout history")),
        };

        let message = err.to_string();
        assert!(message.contains("exit code 1"));
        assert!(message.contains("undo also failed: exit code 5"));
    }

    #[test]
    fn test_rollout_error_without_undo_failure() {
        let err = ActionError::RolloutFailed {
            target: String::from("prod/Deployment/api"),
            code: 3,
            stderr: String::new(),
            undo_failure: None,
        };

        assert!(err.to_string().ends_with("rollout undo was issued"));
    }

    #[test]
    fn test_exit_code_and_captured_output() {
        let err = HerdError::from(ExecError::NonZeroExit {
            command: String::from("kubectl annotate"),
            code: 2,
            stdout: String::from("out"),
            stderr: String::from("err"),
        });

        assert_eq!(err.exit_code(), Some(2));
        assert_eq!(err.captured_stdout(), Some("out"));
        assert_eq!(HerdError::internal("boom").exit_code(), None);
    }

    #[test]
    fn test_state_save_failure_is_distinct() {
        let err = HerdError::from(ActionError::StateSaveFailed {
            origin: String::from("herd.yaml"),
            identifier: String::from("Deployment_api"),
            source: Box::new(StateError::backend("disk full").into()),
        });

        let message = err.to_string();
        assert!(message.contains("was deployed but failed to save state"));
        assert!(message.contains("disk full"));
    }
}
