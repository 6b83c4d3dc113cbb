//! Rollout wait and undo actions.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::action::{ActionInfo, ActionOutcome, ActionResult, Executable, ExecutionContext};
use crate::error::{ActionError, ExecError, HerdError, Result};
use crate::exec::{command_line, RunOptions};
use crate::state::{DeploymentState, Operation};

use super::document::{KubeDocument, ResourceKind};
use super::KUBECTL;

/// A Deployment whose rollout can be observed or undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRollout {
    /// Namespace of the Deployment.
    pub namespace: String,
    /// Kind of the workload.
    pub kind: String,
    /// Name of the Deployment.
    pub name: String,
}

impl DeploymentRollout {
    /// Derives the rollout of a Deployment document.
    ///
    /// Returns `None` for other kinds and for unnamed documents.
    #[must_use]
    pub fn from_document(doc: &KubeDocument) -> Option<Self> {
        if doc.kind != ResourceKind::Deployment {
            return None;
        }
        Some(Self {
            namespace: doc.namespace_or_default().to_string(),
            kind: doc.kind.to_string(),
            name: doc.name()?.to_string(),
        })
    }

    /// `namespace/Kind/name`, used in messages.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.kind, self.name)
    }

    /// `kind/name`, as kubectl expects it.
    #[must_use]
    pub fn resource(&self) -> String {
        format!("{}/{}", self.kind.to_lowercase(), self.name)
    }

    /// Arguments addressing the rollout's namespace and resource.
    pub(crate) fn target_args(&self) -> [String; 3] {
        [String::from("-n"), self.namespace.clone(), self.resource()]
    }

    pub(crate) fn info(&self, prefix: &str, environment: &str, args: &[String]) -> ActionInfo {
        ActionInfo {
            identifier: format!("{prefix}_{}_{}_{}", self.kind, self.namespace, self.name),
            origin: self.target(),
            operation: Operation::Apply,
            descriptor: command_line(KUBECTL, args),
            version: String::new(),
            environment: environment.to_string(),
            stateful: false,
            source_dir: None,
        }
    }
}

/// Waits for a rollout to finish; undoes it if it does not.
#[derive(Debug, Clone)]
pub struct RolloutWaitAction {
    info: ActionInfo,
    rollout: DeploymentRollout,
    undo: RolloutUndoAction,
}

impl RolloutWaitAction {
    /// Creates a wait action.
    #[must_use]
    pub fn new(rollout: DeploymentRollout, environment: &str) -> Self {
        let args = Self::args(&rollout, None);
        Self {
            info: rollout.info("RolloutStatus", environment, &args),
            undo: RolloutUndoAction::new(rollout.clone(), environment),
            rollout,
        }
    }

    /// The observed rollout.
    #[must_use]
    pub const fn rollout(&self) -> &DeploymentRollout {
        &self.rollout
    }

    fn args(rollout: &DeploymentRollout, timeout_secs: Option<u64>) -> Vec<String> {
        let mut args = vec![String::from("rollout"), String::from("status")];
        args.extend(rollout.target_args());
        if let Some(secs) = timeout_secs {
            args.push(format!("--timeout={secs}s"));
        }
        args
    }
}

#[async_trait]
impl Executable for RolloutWaitAction {
    fn info(&self) -> &ActionInfo {
        &self.info
    }

    fn plan_string(&self) -> String {
        format!("wait for rollout of {}", self.rollout.target())
    }

    async fn execute(
        &self,
        _state: Option<&DeploymentState>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ActionResult> {
        if !ctx.options.wait_for_rollout {
            return Ok(ActionResult::new(&self.info, ActionOutcome::Skipped));
        }
        if ctx.options.dry_run {
            info!("Dry run: {}", self.plan_string());
            return Ok(ActionResult::new(&self.info, ActionOutcome::DryRun { path: None }));
        }

        info!("Waiting for rollout of {}", self.rollout.target());
        let args = Self::args(&self.rollout, ctx.options.rollout_timeout_secs);
        let err = match ctx.runner.run(KUBECTL, &args, &RunOptions::default()).await {
            Ok(_) => {
                info!("Rollout of {} complete", self.rollout.target());
                return Ok(ActionResult::new(&self.info, ActionOutcome::Executed));
            }
            Err(err) => err,
        };

        let (code, stderr) = match err {
            HerdError::Exec(ExecError::NonZeroExit { code, stderr, .. }) => (code, stderr),
            other => (-1, other.to_string()),
        };
        warn!(
            "Rollout of {} failed with exit code {code}, undoing",
            self.rollout.target()
        );

        let undo_failure = match self.undo.execute(None, ctx).await {
            Ok(ActionResult {
                outcome: ActionOutcome::Tolerated {
                    code: undo_code,
                    message,
                },
                ..
            }) => Some(format!("exit code {undo_code}: {}", message.trim())),
            Ok(_) => None,
            Err(undo_err) => Some(undo_err.to_string()),
        };

        Err(HerdError::Action(ActionError::RolloutFailed {
            target: self.rollout.target(),
            code,
            stderr,
            undo_failure,
        }))
    }
}

/// Undoes the last rollout of a Deployment.
#[derive(Debug, Clone)]
pub struct RolloutUndoAction {
    info: ActionInfo,
    rollout: DeploymentRollout,
    args: Vec<String>,
}

impl RolloutUndoAction {
    /// Creates an undo action.
    #[must_use]
    pub fn new(rollout: DeploymentRollout, environment: &str) -> Self {
        let mut args = vec![String::from("rollout"), String::from("undo")];
        args.extend(rollout.target_args());
        Self {
            info: rollout.info("RolloutUndo", environment, &args),
            rollout,
            args,
        }
    }
}

#[async_trait]
impl Executable for RolloutUndoAction {
    fn info(&self) -> &ActionInfo {
        &self.info
    }

    fn plan_string(&self) -> String {
        format!("undo rollout of {}", self.rollout.target())
    }

    /// Runs `kubectl rollout undo`.
    ///
    /// A non-zero exit is logged and reported as a tolerated outcome; the
    /// caller decides whether it matters.
    async fn execute(
        &self,
        _state: Option<&DeploymentState>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ActionResult> {
        if ctx.options.dry_run {
            info!("Dry run: {}", self.plan_string());
            return Ok(ActionResult::new(&self.info, ActionOutcome::DryRun { path: None }));
        }

        match ctx.runner.run(KUBECTL, &self.args, &RunOptions::default()).await {
            Ok(_) => {
                info!("Rolled back {}", self.rollout.target());
                Ok(ActionResult::new(&self.info, ActionOutcome::Executed))
            }
            Err(HerdError::Exec(ExecError::NonZeroExit { code, stderr, .. })) => {
                warn!(
                    "Undo of {} failed with exit code {code}: {}",
                    self.rollout.target(),
                    stderr.trim()
                );
                Ok(ActionResult::new(
                    &self.info,
                    ActionOutcome::Tolerated {
                        code,
                        message: stderr,
                    },
                ))
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ExecutionOptions;
    use crate::exec::scripted::{Scripted, ScriptedRunner};
    use crate::kube::document::parse_documents;
    use crate::state::{DeploymentStateStore, MemoryStateBackend};

    fn rollout() -> DeploymentRollout {
        let docs = parse_documents(
            "kind: Deployment\nmetadata:\n  name: api\n  namespace: shop\n",
            None,
        )
        .expect("parse");
        DeploymentRollout::from_document(&docs[0]).expect("rollout")
    }

    fn waiting() -> ExecutionOptions {
        ExecutionOptions {
            wait_for_rollout: true,
            rollout_timeout_secs: Some(120),
            ..ExecutionOptions::default()
        }
    }

    #[test]
    fn test_rollout_from_document() {
        let r = rollout();
        assert_eq!(r.target(), "shop/Deployment/api");
        assert_eq!(r.resource(), "deployment/api");

        let docs = parse_documents("kind: Service\nmetadata:\n  name: api\n", None).expect("parse");
        assert!(DeploymentRollout::from_document(&docs[0]).is_none());
    }

    #[tokio::test]
    async fn test_wait_is_skipped_unless_requested() {
        let runner = ScriptedRunner::default();
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let result = RolloutWaitAction::new(rollout(), "dev")
            .execute(None, &ctx)
            .await
            .expect("skip");

        assert_eq!(result.outcome, ActionOutcome::Skipped);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_wait_passes_timeout() {
        let runner = ScriptedRunner::new([Scripted::ok()]);
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = waiting();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let result = RolloutWaitAction::new(rollout(), "dev")
            .execute(None, &ctx)
            .await
            .expect("wait");

        assert_eq!(result.outcome, ActionOutcome::Executed);
        assert_eq!(
            runner.lines(),
            ["kubectl rollout status -n shop deployment/api --timeout=120s"]
        );
    }

    #[tokio::test]
    async fn test_failed_wait_triggers_undo() {
        let runner = ScriptedRunner::new([Scripted::fail(1, "deadline exceeded"), Scripted::ok()]);
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = waiting();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let err = RolloutWaitAction::new(rollout(), "dev")
            .execute(None, &ctx)
            .await
            .expect_err("wait fails");

        assert_eq!(
            runner.lines()[1],
            "kubectl rollout undo -n shop deployment/api"
        );
        let message = err.to_string();
        assert!(message.contains("exit code 1"));
        assert!(message.contains("rollout undo was issued"));
    }

    #[tokio::test]
    async fn test_failed_undo_is_named_in_error() {
        let runner = ScriptedRunner::new([
            Scripted::fail(1, "deadline exceeded"),
            Scripted::fail(5, "no rollout history found"),
        ]);
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = waiting();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let err = RolloutWaitAction::new(rollout(), "dev")
            .execute(None, &ctx)
            .await
            .expect_err("wait fails");

        assert_eq!(err.exit_code(), Some(1));
        let message = err.to_string();
        assert!(message.contains("undo also failed: exit code 5: no rollout history found"));
    }

    #[tokio::test]
    async fn test_undo_failure_is_not_raised() {
        let runner = ScriptedRunner::new([Scripted::fail(5, "not found")]);
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let result = RolloutUndoAction::new(rollout(), "dev")
            .execute(None, &ctx)
            .await
            .expect("undo never raises on exit code");

        assert_eq!(
            result.outcome,
            ActionOutcome::Tolerated {
                code: 5,
                message: String::from("not found")
            }
        );
    }
}
