//! One-shot `docker run` actions.
//!
//! Deployers, rollback commands and tests all run a container once and
//! wait for it to exit.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::action::{
    write_export, ActionInfo, ActionOutcome, ActionResult, Executable, ExecutionContext,
};
use crate::config::TemplateContext;
use crate::error::{ActionError, HerdError, Result};
use crate::exec::{command_line, RunOptions};
use crate::state::{DeploymentState, Operation};

/// Program invoked by docker actions.
const DOCKER: &str = "docker";

/// What a container run is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DockerRole {
    /// Applies a deployment.
    Deployer,
    /// Reverts a deployment.
    Rollback,
    /// Checks preconditions before deploying.
    PreDeployTest,
    /// Verifies a deployment after it went out.
    PostDeployTest,
}

impl DockerRole {
    /// Returns the role name used in identifiers and file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deployer => "deployer",
            Self::Rollback => "rollback",
            Self::PreDeployTest => "predeploytest",
            Self::PostDeployTest => "postdeploytest",
        }
    }
}

impl std::fmt::Display for DockerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Splits an image reference into repository and tag.
///
/// A colon only separates a tag when it comes after the last `/`, so
/// registry ports are kept in the repository. Digests are dropped.
#[must_use]
pub fn split_image(image: &str) -> (&str, Option<&str>) {
    let image = image.split_once('@').map_or(image, |(name, _)| name);
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let at = name_start + i;
            (&image[..at], Some(&image[at + 1..]))
        }
        None => (image, None),
    }
}

/// A container run executed once.
#[derive(Debug, Clone)]
pub struct DockerRunAction {
    info: ActionInfo,
    image: String,
    name: String,
    role: DockerRole,
    args: Vec<String>,
}

impl DockerRunAction {
    /// Image reference being run.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Display name of the run.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role of the run.
    #[must_use]
    pub const fn role(&self) -> DockerRole {
        self.role
    }

    /// Arguments passed to `docker`.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// File name used for dry-run exports.
    #[must_use]
    pub fn export_file_name(&self) -> String {
        let (repository, _) = split_image(&self.image);
        format!("{}-{}.txt", repository.replace('/', "_"), self.role)
    }
}

#[async_trait]
impl Executable for DockerRunAction {
    fn info(&self) -> &ActionInfo {
        &self.info
    }

    fn plan_string(&self) -> String {
        format!("{} ({}): {}", self.name, self.role, self.info.descriptor)
    }

    async fn execute(
        &self,
        state: Option<&DeploymentState>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ActionResult> {
        if let Some(state) = state.filter(|s| self.info.stateful && !s.modified) {
            info!(
                "{} unchanged since version {}, not running",
                self.name, state.version
            );
            return Ok(ActionResult::new(&self.info, ActionOutcome::Unchanged)
                .with_state(Some(state.clone())));
        }

        if ctx.options.dry_run {
            let path = match &ctx.options.output_dir {
                Some(dir) => Some(
                    write_export(dir, &self.export_file_name(), &self.info.descriptor).await?,
                ),
                None => {
                    info!("Dry run: {}", self.plan_string());
                    None
                }
            };
            return Ok(ActionResult::new(&self.info, ActionOutcome::DryRun { path }));
        }

        info!("Running {} {}", self.role, self.name);
        let output = ctx
            .runner
            .run(DOCKER, &self.args, &RunOptions::default())
            .await
            .map_err(|e| self.info.execution_failed(e))?;

        for line in output.stdout.lines() {
            info!("[{}] {line}", self.name);
        }

        let saved = match state {
            Some(state) if self.info.stateful => {
                Some(ctx.save_state(&self.info, state.clone()).await?)
            }
            _ => None,
        };

        Ok(ActionResult::new(&self.info, ActionOutcome::Executed).with_state(saved))
    }
}

/// Builder for [`DockerRunAction`].
#[derive(Debug, Clone)]
pub struct DockerRunBuilder {
    image: String,
    environment: String,
    name: Option<String>,
    role: DockerRole,
    command: Option<String>,
    expansion: Option<String>,
    env: Vec<(String, String)>,
    version: Option<String>,
    origin: Option<String>,
    stateful: bool,
}

impl DockerRunBuilder {
    /// Starts a run of `image` in `environment`.
    #[must_use]
    pub fn new(image: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            environment: environment.into(),
            name: None,
            role: DockerRole::Deployer,
            command: None,
            expansion: None,
            env: Vec::new(),
            version: None,
            origin: None,
            stateful: false,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the role.
    #[must_use]
    pub const fn with_role(mut self, role: DockerRole) -> Self {
        self.role = role;
        self
    }

    /// Sets the command, split on whitespace into arguments.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Sets a comma-separated `NAME=VALUE` expansion string.
    #[must_use]
    pub fn with_expansion(mut self, expansion: impl Into<String>) -> Self {
        self.expansion = Some(expansion.into());
        self
    }

    /// Adds an explicit environment variable.
    #[must_use]
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((name.into(), value.into()));
        self
    }

    /// Sets the version; defaults to the image tag.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Sets the provenance; defaults to the image reference.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Marks the run as tracked in the state store.
    #[must_use]
    pub const fn stateful(mut self, stateful: bool) -> Self {
        self.stateful = stateful;
        self
    }

    /// Builds the action.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is empty or the expansion string
    /// references an unknown variable.
    pub fn build(self, templates: &TemplateContext) -> Result<DockerRunAction> {
        if self.image.trim().is_empty() {
            return Err(HerdError::Action(ActionError::MissingField {
                action: String::from("docker run"),
                field: String::from("image"),
            }));
        }

        let mut env = vec![(String::from("ENV"), self.environment.clone())];
        if let Some(expansion) = &self.expansion {
            env.extend(templates.expand_env_pairs(expansion)?);
        }
        env.extend(self.env);

        let mut args: Vec<String> = ["run", "-i", "--rm"].map(String::from).to_vec();
        for (name, value) in &env {
            args.push(String::from("-e"));
            args.push(format!("{name}={value}"));
        }
        args.push(self.image.clone());
        if let Some(command) = &self.command {
            args.extend(command.split_whitespace().map(String::from));
        }

        let (repository, tag) = split_image(&self.image);
        let name = self.name.unwrap_or_else(|| repository.to_string());
        let info = ActionInfo {
            identifier: format!("{repository}-{}", self.role),
            origin: self.origin.unwrap_or_else(|| self.image.clone()),
            operation: Operation::Run,
            descriptor: command_line(DOCKER, &args),
            version: self
                .version
                .or_else(|| tag.map(String::from))
                .unwrap_or_else(|| String::from("latest")),
            environment: self.environment,
            stateful: self.stateful,
            source_dir: None,
        };

        debug!("Built {} action {}", self.role, info.identifier);

        Ok(DockerRunAction {
            info,
            image: self.image,
            name,
            role: self.role,
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ExecutionOptions;
    use crate::error::StateError;
    use crate::exec::scripted::{Scripted, ScriptedRunner};
    use crate::state::{DeploymentStateStore, MemoryStateBackend, MockStateBackend};
    use tempfile::TempDir;

    fn deployer() -> DockerRunAction {
        DockerRunBuilder::new("registry.local:5000/team/migrate:1.4.0", "dev")
            .with_name("migrate")
            .with_command("migrate  --all up")
            .with_expansion("DB_HOST=db.internal")
            .with_env("VERBOSE", "1")
            .stateful(true)
            .build(&TemplateContext::isolated())
            .expect("build deployer")
    }

    #[test]
    fn test_split_image() {
        assert_eq!(split_image("nginx"), ("nginx", None));
        assert_eq!(split_image("nginx:1.25"), ("nginx", Some("1.25")));
        assert_eq!(
            split_image("registry.local:5000/team/app"),
            ("registry.local:5000/team/app", None)
        );
        assert_eq!(
            split_image("registry.local:5000/team/app:2@sha256:abc"),
            ("registry.local:5000/team/app", Some("2"))
        );
    }

    #[test]
    fn test_argument_order() {
        let action = deployer();

        assert_eq!(
            action.args(),
            [
                "run",
                "-i",
                "--rm",
                "-e",
                "ENV=dev",
                "-e",
                "DB_HOST=db.internal",
                "-e",
                "VERBOSE=1",
                "registry.local:5000/team/migrate:1.4.0",
                "migrate",
                "--all",
                "up",
            ]
        );
        assert_eq!(action.info().version, "1.4.0");
        assert_eq!(action.info().identifier, "registry.local:5000/team/migrate-deployer");
        assert!(action.plan_string().starts_with("migrate (deployer): docker run -i --rm"));
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let err = DockerRunBuilder::new(" ", "dev")
            .build(&TemplateContext::isolated())
            .expect_err("empty image");

        assert!(matches!(
            err,
            HerdError::Action(ActionError::MissingField { ref field, .. }) if field == "image"
        ));
    }

    #[tokio::test]
    async fn test_dry_run_writes_command_file() {
        let temp = TempDir::new().expect("temp dir");
        let runner = ScriptedRunner::default();
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions {
            dry_run: true,
            output_dir: Some(temp.path().to_path_buf()),
            ..ExecutionOptions::default()
        };
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let action = deployer();
        let result = action.execute(None, &ctx).await.expect("dry run");

        let expected = temp
            .path()
            .join("registry.local:5000_team_migrate-deployer.txt");
        assert_eq!(
            result.outcome,
            ActionOutcome::DryRun {
                path: Some(expected.clone())
            }
        );
        let content = std::fs::read_to_string(expected).expect("export");
        assert_eq!(content, action.info().descriptor);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_execute_saves_state() {
        let runner = ScriptedRunner::new([Scripted::Ok(String::from("migrated 3 tables\n"))]);
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let action = deployer();
        let state = store
            .get_deployment_state(&action.info().state_query())
            .await
            .expect("state");
        let result = action.execute(Some(&state), &ctx).await.expect("execute");

        assert_eq!(result.outcome, ActionOutcome::Executed);
        assert!(result.state.and_then(|s| s.timestamp).is_some());
        assert_eq!(runner.calls()[0].command, "docker");
        assert!(runner.calls()[0].stdin.is_none());

        let again = store
            .get_deployment_state(&action.info().state_query())
            .await
            .expect("state");
        let result = action.execute(Some(&again), &ctx).await.expect("execute");
        assert_eq!(result.outcome, ActionOutcome::Unchanged);
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_deployer_skips_dry_run_export() {
        let temp = TempDir::new().expect("temp dir");
        let runner = ScriptedRunner::default();
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let action = deployer();

        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);
        let state = store
            .get_deployment_state(&action.info().state_query())
            .await
            .expect("state");
        action.execute(Some(&state), &ctx).await.expect("execute");

        let dry = ExecutionOptions {
            dry_run: true,
            output_dir: Some(temp.path().to_path_buf()),
            ..ExecutionOptions::default()
        };
        let ctx = ExecutionContext::new(&runner, &store, &dry);
        let unchanged = store
            .get_deployment_state(&action.info().state_query())
            .await
            .expect("state");
        let result = action.execute(Some(&unchanged), &ctx).await.expect("dry run");

        assert_eq!(result.outcome, ActionOutcome::Unchanged);
        assert!(!temp.path().join(action.export_file_name()).exists());
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_run_failure_keeps_exit_code() {
        let runner = ScriptedRunner::new([Scripted::fail(125, "no such image")]);
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let err = deployer().execute(None, &ctx).await.expect_err("should fail");

        assert_eq!(err.exit_code(), Some(125));
        assert!(matches!(
            err,
            HerdError::Action(ActionError::ExecutionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_state_save_failure_is_distinct() {
        let mut backend = MockStateBackend::new();
        backend.expect_get().returning(|_| Ok(None));
        backend
            .expect_set()
            .returning(|_, _| Err(HerdError::State(StateError::backend("read-only"))));
        let store = DeploymentStateStore::new(Box::new(backend));
        let runner = ScriptedRunner::default();
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let action = deployer();
        let state = store
            .get_deployment_state(&action.info().state_query())
            .await
            .expect("state");
        let err = action.execute(Some(&state), &ctx).await.expect_err("save fails");

        assert!(matches!(
            err,
            HerdError::Action(ActionError::StateSaveFailed { .. })
        ));
        assert_eq!(runner.calls().len(), 1);
    }
}
