//! Container-run tests with rollback on failure.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::action::{ActionInfo, ActionResult, DeploymentAction, Executable, ExecutionContext};
use crate::error::Result;
use crate::state::DeploymentState;

use super::run::DockerRunAction;

/// A test run that triggers rollback actions when it fails.
#[derive(Debug, Clone)]
pub struct DockerTestAction {
    run: DockerRunAction,
    rollback: Vec<DeploymentAction>,
}

impl DockerTestAction {
    /// Wraps a test run.
    #[must_use]
    pub const fn new(run: DockerRunAction) -> Self {
        Self {
            run,
            rollback: Vec::new(),
        }
    }

    /// Sets the actions executed when the test fails.
    #[must_use]
    pub fn with_rollback(mut self, rollback: Vec<DeploymentAction>) -> Self {
        self.rollback = rollback;
        self
    }

    /// Actions executed when the test fails.
    #[must_use]
    pub fn rollback_actions(&self) -> &[DeploymentAction] {
        &self.rollback
    }
}

#[async_trait]
impl Executable for DockerTestAction {
    fn info(&self) -> &ActionInfo {
        self.run.info()
    }

    fn plan_string(&self) -> String {
        let mut plan = self.run.plan_string();
        for action in &self.rollback {
            plan.push_str(&format!("\n  on failure: {}", action.plan_string()));
        }
        plan
    }

    async fn execute(
        &self,
        state: Option<&DeploymentState>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ActionResult> {
        let err = match self.run.execute(state, ctx).await {
            Ok(result) => {
                info!("Test {} passed", self.run.name());
                return Ok(result);
            }
            Err(err) => err,
        };

        if let Some(stdout) = err.captured_stdout().filter(|s| !s.trim().is_empty()) {
            warn!("Output of failed test {}:\n{}", self.run.name(), stdout.trim_end());
        }

        if !self.rollback.is_empty() {
            warn!(
                "Test {} failed, running {} rollback action(s)",
                self.run.name(),
                self.rollback.len()
            );
            for action in &self.rollback {
                if let Err(rollback_err) = action.execute(None, ctx).await {
                    error!(
                        "Rollback action {} failed: {rollback_err}",
                        action.info().identifier
                    );
                }
            }
        }

        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionOutcome, ExecutionOptions};
    use crate::config::TemplateContext;
    use crate::docker::{DockerRole, DockerRunBuilder};
    use crate::error::{ActionError, HerdError};
    use crate::exec::scripted::{Scripted, ScriptedRunner};
    use crate::state::{DeploymentStateStore, MemoryStateBackend};

    fn run(role: DockerRole, command: &str) -> DockerRunAction {
        DockerRunBuilder::new("team/app:2.0.0", "staging")
            .with_role(role)
            .with_command(command)
            .build(&TemplateContext::isolated())
            .expect("build")
    }

    fn post_deploy_test() -> DockerTestAction {
        DockerTestAction::new(run(DockerRole::PostDeployTest, "smoke"))
            .with_rollback(vec![run(DockerRole::Rollback, "revert --to previous").into()])
    }

    #[tokio::test]
    async fn test_passing_test_skips_rollback() {
        let runner = ScriptedRunner::new([Scripted::ok()]);
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let result = post_deploy_test()
            .execute(None, &ctx)
            .await
            .expect("test passes");

        assert_eq!(result.outcome, ActionOutcome::Executed);
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_runs_rollback_then_rethrows() {
        let runner = ScriptedRunner::new([
            Scripted::Fail {
                code: 1,
                stdout: String::from("2 of 9 checks failed"),
                stderr: String::from("smoke failed"),
            },
            Scripted::ok(),
        ]);
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let err = post_deploy_test()
            .execute(None, &ctx)
            .await
            .expect_err("test fails");

        let lines = runner.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("team/app:2.0.0 smoke"));
        assert!(lines[1].ends_with("team/app:2.0.0 revert --to previous"));
        assert!(matches!(
            err,
            HerdError::Action(ActionError::ExecutionFailed { code: 1, .. })
        ));
        assert_eq!(err.captured_stdout(), Some("2 of 9 checks failed"));
    }

    #[tokio::test]
    async fn test_rollback_failure_keeps_original_error() {
        let runner = ScriptedRunner::new([Scripted::fail(3, "smoke"), Scripted::fail(9, "revert")]);
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let err = post_deploy_test()
            .execute(None, &ctx)
            .await
            .expect_err("test fails");

        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn test_plan_string_lists_rollback() {
        let action = post_deploy_test();
        let plan = action.plan_string();

        assert!(plan.contains("(postdeploytest)"));
        assert!(plan.contains("on failure:"));
        assert_eq!(action.rollback_actions().len(), 1);
    }
}
