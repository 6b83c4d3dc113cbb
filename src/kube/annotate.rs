//! Deployment time annotation.
//!
//! Stamps a Deployment with the time it was last deployed. The annotation
//! is informational, so failures are retried a few times and then only
//! logged.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::action::{ActionInfo, ActionOutcome, ActionResult, Executable, ExecutionContext};
use crate::error::Result;
use crate::exec::RunOptions;
use crate::state::DeploymentState;

use super::rollout::DeploymentRollout;
use super::KUBECTL;

/// Annotation key holding the deployment time.
pub const DEPLOYMENT_TIMESTAMP_ANNOTATION: &str = "lastDeploymentTimestamp";

/// Total number of annotate attempts.
pub const ANNOTATION_ATTEMPTS: u32 = 5;

/// Default delay between attempts.
pub const DEFAULT_ANNOTATION_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Annotates a Deployment with the current time.
#[derive(Debug, Clone)]
pub struct TimeAnnotationAction {
    info: ActionInfo,
    rollout: DeploymentRollout,
    retry_delay: Duration,
}

impl TimeAnnotationAction {
    /// Creates an annotation action.
    #[must_use]
    pub fn new(rollout: DeploymentRollout, environment: &str) -> Self {
        let args = Self::args(&rollout, "<now>");
        Self {
            info: rollout.info("Annotate", environment, &args),
            rollout,
            retry_delay: DEFAULT_ANNOTATION_RETRY_DELAY,
        }
    }

    /// Sets the delay between attempts.
    #[must_use]
    pub const fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    fn args(rollout: &DeploymentRollout, timestamp: &str) -> Vec<String> {
        let mut args = vec![String::from("annotate"), String::from("--overwrite")];
        args.extend(rollout.target_args());
        args.push(format!("{DEPLOYMENT_TIMESTAMP_ANNOTATION}={timestamp}"));
        args
    }
}

#[async_trait]
impl Executable for TimeAnnotationAction {
    fn info(&self) -> &ActionInfo {
        &self.info
    }

    fn plan_string(&self) -> String {
        format!(
            "annotate {} with {DEPLOYMENT_TIMESTAMP_ANNOTATION}",
            self.rollout.target()
        )
    }

    async fn execute(
        &self,
        _state: Option<&DeploymentState>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ActionResult> {
        if ctx.options.dry_run {
            info!("Dry run: {}", self.plan_string());
            return Ok(ActionResult::new(&self.info, ActionOutcome::DryRun { path: None }));
        }

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let args = Self::args(&self.rollout, &timestamp);

        let mut attempt = 1;
        loop {
            let err = match ctx.runner.run(KUBECTL, &args, &RunOptions::default()).await {
                Ok(_) => {
                    debug!("Annotated {} at attempt {attempt}", self.rollout.target());
                    return Ok(ActionResult::new(&self.info, ActionOutcome::Executed));
                }
                Err(err) => err,
            };

            if attempt >= ANNOTATION_ATTEMPTS {
                warn!(
                    "Giving up annotating {} after {attempt} attempts: {err}",
                    self.rollout.target()
                );
                return Ok(ActionResult::new(
                    &self.info,
                    ActionOutcome::Tolerated {
                        code: err.exit_code().unwrap_or(-1),
                        message: err.to_string(),
                    },
                ));
            }

            debug!(
                "Annotating {} failed (attempt {attempt}/{ANNOTATION_ATTEMPTS}): {err}",
                self.rollout.target()
            );
            tokio::time::sleep(self.retry_delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ExecutionOptions;
    use crate::exec::scripted::{Scripted, ScriptedRunner};
    use crate::state::{DeploymentStateStore, MemoryStateBackend};
    use tokio::time::Instant;

    const DELAY: Duration = Duration::from_millis(750);

    fn action() -> TimeAnnotationAction {
        let rollout = DeploymentRollout {
            namespace: String::from("default"),
            kind: String::from("Deployment"),
            name: String::from("api"),
        };
        TimeAnnotationAction::new(rollout, "dev").with_retry_delay(DELAY)
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_fifth_attempt() {
        let runner = ScriptedRunner::new([
            Scripted::fail(1, "conflict"),
            Scripted::fail(1, "conflict"),
            Scripted::fail(1, "conflict"),
            Scripted::fail(1, "conflict"),
            Scripted::ok(),
        ]);
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let start = Instant::now();
        let result = action().execute(None, &ctx).await.expect("annotate");

        assert_eq!(result.outcome, ActionOutcome::Executed);
        assert_eq!(runner.calls().len(), 5);
        assert_eq!(start.elapsed(), DELAY * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_without_error() {
        let runner = ScriptedRunner::new((0..5).map(|_| Scripted::fail(1, "forbidden")));
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let start = Instant::now();
        let result = action().execute(None, &ctx).await;

        tokio_test::assert_ok!(&result);
        assert!(matches!(
            result.map(|r| r.outcome),
            Ok(ActionOutcome::Tolerated { code: 1, .. })
        ));
        assert_eq!(runner.calls().len(), 5);
        assert_eq!(start.elapsed(), DELAY * 4);
    }

    #[tokio::test]
    async fn test_annotation_arguments() {
        let runner = ScriptedRunner::new([Scripted::ok()]);
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        action().execute(None, &ctx).await.expect("annotate");

        let args = &runner.calls()[0].args;
        assert_eq!(&args[..5], ["annotate", "--overwrite", "-n", "default", "deployment/api"]);
        assert!(args[5].starts_with("lastDeploymentTimestamp=20"));
    }
}
