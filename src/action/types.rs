//! Shared action types.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::error::{ActionError, ExecError, HerdError, Result};
use crate::exec::CommandRunner;
use crate::state::{DeploymentState, DeploymentStateStore, Descriptor, Operation, StateQuery};

/// Identity and payload of an action.
///
/// Built completely by the action's builder; never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionInfo {
    /// Stable resource identifier.
    pub identifier: String,
    /// Human-readable provenance.
    pub origin: String,
    /// Operation performed.
    pub operation: Operation,
    /// Literal payload sent to the external tool.
    pub descriptor: String,
    /// Version being deployed.
    pub version: String,
    /// Target environment.
    pub environment: String,
    /// Whether the action participates in the state store.
    pub stateful: bool,
    /// Directory whose contents stand in for the descriptor when signing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_dir: Option<PathBuf>,
}

impl ActionInfo {
    /// Builds the state lookup for this action.
    #[must_use]
    pub fn state_query(&self) -> StateQuery<'_> {
        StateQuery {
            env: &self.environment,
            identifier: &self.identifier,
            operation: self.operation,
            version: &self.version,
            descriptor: self
                .source_dir
                .as_deref()
                .map_or(Descriptor::Text(&self.descriptor), Descriptor::Directory),
            origin: &self.origin,
        }
    }

    /// Wraps a failed external command with this action's payload.
    ///
    /// Errors other than a non-zero exit are returned unchanged.
    #[must_use]
    pub fn execution_failed(&self, err: HerdError) -> HerdError {
        match err {
            HerdError::Exec(ExecError::NonZeroExit {
                code,
                stdout,
                stderr,
                ..
            }) => HerdError::Action(ActionError::ExecutionFailed {
                operation: self.operation.to_string(),
                identifier: self.identifier.clone(),
                origin: self.origin.clone(),
                descriptor: self.descriptor.clone(),
                code,
                stdout,
                stderr,
            }),
            other => other,
        }
    }
}

/// Per-invocation execution options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Describe instead of mutating.
    pub dry_run: bool,
    /// Where dry-run exports are written.
    pub output_dir: Option<PathBuf>,
    /// Whether rollout-wait actions actually wait.
    pub wait_for_rollout: bool,
    /// Timeout passed to `kubectl rollout status`.
    pub rollout_timeout_secs: Option<u64>,
}

/// Everything an action needs while executing.
#[derive(Clone, Copy)]
pub struct ExecutionContext<'a> {
    /// Runs external tools.
    pub runner: &'a dyn CommandRunner,
    /// Deployment state store.
    pub store: &'a DeploymentStateStore,
    /// Execution options.
    pub options: &'a ExecutionOptions,
}

impl std::fmt::Debug for ExecutionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("store", self.store)
            .field("options", self.options)
            .finish_non_exhaustive()
    }
}

impl<'a> ExecutionContext<'a> {
    /// Creates a new execution context.
    #[must_use]
    pub const fn new(
        runner: &'a dyn CommandRunner,
        store: &'a DeploymentStateStore,
        options: &'a ExecutionOptions,
    ) -> Self {
        Self {
            runner,
            store,
            options,
        }
    }

    /// Persists `state` on behalf of the action described by `info`.
    ///
    /// Failures are reported as [`ActionError::StateSaveFailed`] so they are
    /// never mistaken for a failed deployment.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    pub async fn save_state(
        &self,
        info: &ActionInfo,
        state: DeploymentState,
    ) -> Result<DeploymentState> {
        self.store
            .save_deployment_state(state)
            .await
            .map_err(|e| {
                HerdError::Action(ActionError::StateSaveFailed {
                    origin: info.origin.clone(),
                    identifier: info.identifier.clone(),
                    source: Box::new(e),
                })
            })
    }
}

/// Writes a dry-run export file into `dir`.
///
/// # Errors
///
/// Returns an error if the directory or the file cannot be written.
pub async fn write_export(dir: &Path, file_name: &str, content: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    fs::write(&path, content).await?;
    info!("Dry run: wrote {}", path.display());
    Ok(path)
}

/// What happened when an action executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ActionOutcome {
    /// The external tool ran successfully.
    Executed,
    /// Nothing changed since the last deployment.
    Unchanged,
    /// Dry run; an export was written if a path is given.
    DryRun {
        /// Exported file.
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
    /// The action chose not to run.
    Skipped,
    /// The external tool failed but the failure is acceptable.
    Tolerated {
        /// Exit code of the external tool.
        code: i32,
        /// Captured error output.
        message: String,
    },
}

/// Result of executing one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    /// Identifier of the action.
    pub identifier: String,
    /// Operation of the action.
    pub operation: Operation,
    /// What happened.
    pub outcome: ActionOutcome,
    /// Deployment state after execution, for stateful actions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<DeploymentState>,
}

impl ActionResult {
    /// Creates a result for the action described by `info`.
    #[must_use]
    pub fn new(info: &ActionInfo, outcome: ActionOutcome) -> Self {
        Self {
            identifier: info.identifier.clone(),
            operation: info.operation,
            outcome,
            state: None,
        }
    }

    /// Attaches the resulting deployment state.
    #[must_use]
    pub fn with_state(mut self, state: Option<DeploymentState>) -> Self {
        self.state = state;
        self
    }

    /// Returns true if the action changed something outside the process.
    #[must_use]
    pub const fn changed(&self) -> bool {
        matches!(
            self.outcome,
            ActionOutcome::Executed | ActionOutcome::Tolerated { .. }
        )
    }
}
