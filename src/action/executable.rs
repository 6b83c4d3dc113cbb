//! The lifecycle every deployment action follows.

use async_trait::async_trait;

use crate::docker::{DockerRunAction, DockerTestAction};
use crate::error::Result;
use crate::kube::{KubectlAction, RolloutUndoAction, RolloutWaitAction, TimeAnnotationAction};
use crate::state::DeploymentState;

use super::types::{ActionInfo, ActionResult, ExecutionContext};

/// A unit of deployment work.
#[async_trait]
pub trait Executable: Send + Sync {
    /// Identity and payload of the action.
    fn info(&self) -> &ActionInfo;

    /// Describes what the action would do, without side effects.
    fn plan_string(&self) -> String;

    /// Executes the action.
    ///
    /// `state` is the prior-state evaluation attached by the owning plan;
    /// stateful actions require it.
    async fn execute(
        &self,
        state: Option<&DeploymentState>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ActionResult>;

    /// Whether [`Executable::rollback`] can undo a successful execution.
    fn can_rollback_execution(&self) -> bool {
        false
    }

    /// Undoes a successful execution.
    async fn rollback(&self, _ctx: &ExecutionContext<'_>) -> Result<Vec<ActionResult>> {
        Ok(Vec::new())
    }
}

/// Every kind of action a plan can hold.
#[derive(Debug, Clone)]
pub enum DeploymentAction {
    /// One-shot container run.
    DockerRun(DockerRunAction),
    /// Container-run test with rollback on failure.
    DockerTest(DockerTestAction),
    /// `kubectl apply` or `kubectl delete`.
    Kubectl(KubectlAction),
    /// `kubectl rollout status`.
    RolloutWait(RolloutWaitAction),
    /// `kubectl rollout undo`.
    RolloutUndo(RolloutUndoAction),
    /// `kubectl annotate` with the deployment time.
    TimeAnnotation(TimeAnnotationAction),
}

impl DeploymentAction {
    fn inner(&self) -> &dyn Executable {
        match self {
            Self::DockerRun(action) => action,
            Self::DockerTest(action) => action,
            Self::Kubectl(action) => action,
            Self::RolloutWait(action) => action,
            Self::RolloutUndo(action) => action,
            Self::TimeAnnotation(action) => action,
        }
    }

    /// Short name of the action kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DockerRun(_) => "docker-run",
            Self::DockerTest(_) => "docker-test",
            Self::Kubectl(_) => "kubectl",
            Self::RolloutWait(_) => "rollout-wait",
            Self::RolloutUndo(_) => "rollout-undo",
            Self::TimeAnnotation(_) => "annotate",
        }
    }
}

#[async_trait]
impl Executable for DeploymentAction {
    fn info(&self) -> &ActionInfo {
        self.inner().info()
    }

    fn plan_string(&self) -> String {
        self.inner().plan_string()
    }

    async fn execute(
        &self,
        state: Option<&DeploymentState>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ActionResult> {
        self.inner().execute(state, ctx).await
    }

    fn can_rollback_execution(&self) -> bool {
        self.inner().can_rollback_execution()
    }

    async fn rollback(&self, ctx: &ExecutionContext<'_>) -> Result<Vec<ActionResult>> {
        self.inner().rollback(ctx).await
    }
}

impl From<DockerRunAction> for DeploymentAction {
    fn from(action: DockerRunAction) -> Self {
        Self::DockerRun(action)
    }
}

impl From<DockerTestAction> for DeploymentAction {
    fn from(action: DockerTestAction) -> Self {
        Self::DockerTest(action)
    }
}

impl From<KubectlAction> for DeploymentAction {
    fn from(action: KubectlAction) -> Self {
        Self::Kubectl(action)
    }
}

impl From<RolloutWaitAction> for DeploymentAction {
    fn from(action: RolloutWaitAction) -> Self {
        Self::RolloutWait(action)
    }
}

impl From<RolloutUndoAction> for DeploymentAction {
    fn from(action: RolloutUndoAction) -> Self {
        Self::RolloutUndo(action)
    }
}

impl From<TimeAnnotationAction> for DeploymentAction {
    fn from(action: TimeAnnotationAction) -> Self {
        Self::TimeAnnotation(action)
    }
}
