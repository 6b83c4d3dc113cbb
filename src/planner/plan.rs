//! Deployment plans.
//!
//! A plan is the ordered list of actions for one deployment unit, either
//! one image or one set of manifests. Prior state is looked up when an
//! action is added, and actions run strictly in insertion order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::action::{ActionResult, DeploymentAction, Executable, ExecutionContext};
use crate::error::Result;
use crate::kube::{RolloutWaitAction, TimeAnnotationAction, DEFAULT_ANNOTATION_RETRY_DELAY};
use crate::state::{DeploymentState, DeploymentStateStore, Operation};

/// An action together with the state attached when it was planned.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// The action.
    pub action: DeploymentAction,
    /// Prior-state evaluation, for stateful actions.
    pub state: Option<DeploymentState>,
}

impl PlannedAction {
    /// Returns true if the attached state says nothing changed.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.state.as_ref().is_some_and(|s| !s.modified)
    }
}

/// An ordered list of actions for one deployment unit.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    /// Name of the deployment unit.
    pub name: String,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    actions: Vec<PlannedAction>,
    annotate_rollouts: bool,
    annotation_retry_delay: Duration,
}

/// Results of a completed plan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResult {
    /// Name of the deployment unit.
    pub name: String,
    /// One result per action, in execution order.
    pub results: Vec<ActionResult>,
}

impl PlanResult {
    /// Number of actions that changed something.
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.results.iter().filter(|r| r.changed()).count()
    }
}

impl DeploymentPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            actions: Vec::new(),
            annotate_rollouts: false,
            annotation_retry_delay: DEFAULT_ANNOTATION_RETRY_DELAY,
        }
    }

    /// Follows every rollout wait with a deployment time annotation.
    #[must_use]
    pub const fn with_rollout_annotation(mut self, enabled: bool, retry_delay: Duration) -> Self {
        self.annotate_rollouts = enabled;
        self.annotation_retry_delay = retry_delay;
        self
    }

    /// Adds an action, attaching its prior state.
    ///
    /// A modified `kubectl apply` with Deployments is followed by one
    /// rollout wait per Deployment, and by the time annotations if enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lookup fails.
    pub async fn add_action(
        &mut self,
        action: impl Into<DeploymentAction>,
        store: &DeploymentStateStore,
    ) -> Result<()> {
        let action = action.into();
        let info = action.info();

        let state = if info.stateful {
            Some(store.get_deployment_state(&info.state_query()).await?)
        } else {
            None
        };
        debug!(
            "Planned {} {} (modified: {:?})",
            action.kind(),
            info.identifier,
            state.as_ref().map(|s| s.modified)
        );

        let followers = match (&action, &state) {
            (DeploymentAction::Kubectl(kubectl), Some(state))
                if kubectl.info().operation == Operation::Apply && state.modified =>
            {
                let environment = &kubectl.info().environment;
                let mut followers: Vec<DeploymentAction> = kubectl
                    .rollouts()
                    .iter()
                    .map(|r| DeploymentAction::from(RolloutWaitAction::new(r.clone(), environment)))
                    .collect();
                if self.annotate_rollouts {
                    followers.extend(kubectl.rollouts().iter().map(|r| {
                        DeploymentAction::from(
                            TimeAnnotationAction::new(r.clone(), environment)
                                .with_retry_delay(self.annotation_retry_delay),
                        )
                    }));
                }
                followers
            }
            _ => Vec::new(),
        };

        self.actions.push(PlannedAction { action, state });
        self.actions.extend(
            followers
                .into_iter()
                .map(|action| PlannedAction { action, state: None }),
        );
        Ok(())
    }

    /// Planned actions, in execution order.
    #[must_use]
    pub fn actions(&self) -> &[PlannedAction] {
        &self.actions
    }

    /// Returns true if the plan holds no action.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Describes every action without side effects.
    #[must_use]
    pub fn plan_strings(&self) -> Vec<String> {
        self.actions
            .iter()
            .map(|planned| planned.action.plan_string())
            .collect()
    }

    /// Executes every action in order.
    ///
    /// The first failure aborts the remaining actions.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing action.
    pub async fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<PlanResult> {
        info!("Executing plan {} with {} action(s)", self.name, self.actions.len());

        let mut results = Vec::with_capacity(self.actions.len());
        for (i, planned) in self.actions.iter().enumerate() {
            debug!("[{}/{}] {}", i + 1, self.actions.len(), planned.action.plan_string());
            results.push(planned.action.execute(planned.state.as_ref(), ctx).await?);
        }

        Ok(PlanResult {
            name: self.name.clone(),
            results,
        })
    }
}

impl std::fmt::Display for DeploymentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.actions.is_empty() {
            return write!(f, "Plan {}: nothing to do", self.name);
        }

        writeln!(f, "Plan {} ({} actions):", self.name, self.actions.len())?;
        for (i, planned) in self.actions.iter().enumerate() {
            let marker = if planned.is_unchanged() { " (unchanged)" } else { "" };
            writeln!(f, "  {i}. {}{marker}", planned.action.plan_string())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionOutcome, ExecutionOptions};
    use crate::config::TemplateContext;
    use crate::docker::DockerRunBuilder;
    use crate::exec::scripted::{Scripted, ScriptedRunner};
    use crate::kube::KubectlActionBuilder;
    use crate::state::MemoryStateBackend;

    const TWO_DEPLOYMENTS: &str = r"
kind: Deployment
metadata:
  name: api
---
kind: Deployment
metadata:
  name: worker
";

    fn apply() -> DeploymentAction {
        KubectlActionBuilder::new(TWO_DEPLOYMENTS, Operation::Apply, "dev")
            .with_templates(TemplateContext::isolated())
            .build()
            .expect("build")
            .into()
    }

    fn waiting() -> ExecutionOptions {
        ExecutionOptions {
            wait_for_rollout: true,
            ..ExecutionOptions::default()
        }
    }

    #[tokio::test]
    async fn test_apply_is_followed_by_waits() {
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let mut plan = DeploymentPlan::new("api")
            .with_rollout_annotation(true, Duration::from_millis(1));
        plan.add_action(apply(), &store).await.expect("add");

        let kinds: Vec<&str> = plan.actions().iter().map(|p| p.action.kind()).collect();
        assert_eq!(
            kinds,
            ["kubectl", "rollout-wait", "rollout-wait", "annotate", "annotate"]
        );
        assert!(plan.actions()[0].state.is_some());
        assert!(plan.actions()[1].state.is_none());
    }

    #[tokio::test]
    async fn test_unchanged_apply_gets_no_wait() {
        let runner = ScriptedRunner::default();
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let mut first = DeploymentPlan::new("api");
        first.add_action(apply(), &store).await.expect("add");
        first.execute(&ctx).await.expect("execute");

        let mut second = DeploymentPlan::new("api");
        second.add_action(apply(), &store).await.expect("add");

        assert_eq!(second.actions().len(), 1);
        assert!(second.actions()[0].is_unchanged());
        assert!(second.to_string().contains("(unchanged)"));
    }

    #[tokio::test]
    async fn test_delete_gets_no_wait() {
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let delete = KubectlActionBuilder::new(TWO_DEPLOYMENTS, Operation::Delete, "dev")
            .with_templates(TemplateContext::isolated())
            .build()
            .expect("build");

        let mut plan = DeploymentPlan::new("api");
        plan.add_action(delete, &store).await.expect("add");

        assert_eq!(plan.actions().len(), 1);
    }

    #[tokio::test]
    async fn test_actions_run_in_order() {
        let runner = ScriptedRunner::default();
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = waiting();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let migrate = DockerRunBuilder::new("team/migrate:2.0.0", "dev")
            .with_command("migrate up")
            .build(&TemplateContext::isolated())
            .expect("build");
        let mut plan = DeploymentPlan::new("api");
        plan.add_action(migrate, &store).await.expect("add");
        plan.add_action(apply(), &store).await.expect("add");

        let result = plan.execute(&ctx).await.expect("execute");

        assert_eq!(result.results.len(), 4);
        assert_eq!(result.changed_count(), 4);
        assert_eq!(
            runner.lines(),
            [
                "docker run -i --rm -e ENV=dev team/migrate:2.0.0 migrate up",
                "kubectl apply -f -",
                "kubectl rollout status -n default deployment/api",
                "kubectl rollout status -n default deployment/worker",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_wait_undoes_and_aborts() {
        let runner = ScriptedRunner::new([
            Scripted::ok(),
            Scripted::fail(1, "progress deadline exceeded"),
            Scripted::ok(),
        ]);
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = waiting();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let mut plan = DeploymentPlan::new("api");
        plan.add_action(apply(), &store).await.expect("add");

        let err = plan.execute(&ctx).await.expect_err("wait fails");

        assert_eq!(err.exit_code(), Some(1));
        assert_eq!(
            runner.lines(),
            [
                "kubectl apply -f -",
                "kubectl rollout status -n default deployment/api",
                "kubectl rollout undo -n default deployment/api",
            ]
        );
    }

    #[tokio::test]
    async fn test_dry_run_reaches_every_action() {
        let runner = ScriptedRunner::default();
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions {
            dry_run: true,
            ..waiting()
        };
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let mut plan = DeploymentPlan::new("api");
        plan.add_action(apply(), &store).await.expect("add");
        let result = plan.execute(&ctx).await.expect("dry run");

        assert!(runner.calls().is_empty());
        assert!(result
            .results
            .iter()
            .all(|r| matches!(r.outcome, ActionOutcome::DryRun { .. })));
        assert_eq!(plan.plan_strings().len(), 3);
    }
}
