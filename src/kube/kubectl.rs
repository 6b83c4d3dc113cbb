//! `kubectl apply` and `kubectl delete` actions.
//!
//! The builder does all document work up front: template expansion, the
//! optional branch rewrite, cluster policies, identification and rollout
//! discovery. The resulting action only pipes its final manifest to kubectl.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::action::{
    write_export, ActionInfo, ActionOutcome, ActionResult, Executable, ExecutionContext,
};
use crate::config::TemplateContext;
use crate::error::{ActionError, DocumentError, ExecError, HerdError, Result};
use crate::exec::RunOptions;
use crate::state::{DeploymentState, Operation};

use super::branch::{transform_documents, BranchModification, NameChangeIndex};
use super::document::{group_by_kind, parse_documents, serialize_documents, KubeDocument, ResourceKind};
use super::policy::ClusterPolicies;
use super::rollout::{DeploymentRollout, RolloutUndoAction};
use super::KUBECTL;

/// Version recorded when none is given.
pub const UNVERSIONED: &str = "unversioned";

const DEFAULT_ORIGIN: &str = "manifest";

/// Applies or deletes a manifest with kubectl.
#[derive(Debug, Clone)]
pub struct KubectlAction {
    info: ActionInfo,
    documents: Vec<KubeDocument>,
    rollouts: Vec<DeploymentRollout>,
}

impl KubectlAction {
    /// Final documents, after branch rewrite and policies.
    #[must_use]
    pub fn documents(&self) -> &[KubeDocument] {
        &self.documents
    }

    /// Rollouts of the Deployments in this manifest.
    #[must_use]
    pub fn rollouts(&self) -> &[DeploymentRollout] {
        &self.rollouts
    }

    /// Documents grouped by kind.
    #[must_use]
    pub fn by_kind(&self) -> BTreeMap<ResourceKind, Vec<&KubeDocument>> {
        group_by_kind(&self.documents)
    }

    /// File name used for dry-run exports.
    #[must_use]
    pub fn export_file_name(&self) -> String {
        format!(
            "{}-{}.yaml",
            self.info.operation,
            self.info.identifier.to_lowercase()
        )
    }

    fn args(&self) -> Vec<String> {
        vec![
            self.info.operation.to_string(),
            String::from("-f"),
            String::from("-"),
        ]
    }
}

#[async_trait]
impl Executable for KubectlAction {
    fn info(&self) -> &ActionInfo {
        &self.info
    }

    fn plan_string(&self) -> String {
        format!(
            "kubectl {} {} ({} document(s) from {})",
            self.info.operation,
            self.info.identifier,
            self.documents.len(),
            self.info.origin
        )
    }

    async fn execute(
        &self,
        state: Option<&DeploymentState>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ActionResult> {
        let state = state.ok_or_else(|| {
            HerdError::Action(ActionError::StateNotAttached {
                identifier: self.info.identifier.clone(),
            })
        })?;

        if !state.modified {
            info!(
                "{} unchanged since version {}, not running kubectl {}",
                self.info.identifier, state.version, self.info.operation
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

        info!("kubectl {} {}", self.info.operation, self.info.identifier);
        let options = RunOptions::with_stdin(self.info.descriptor.as_str());
        match ctx.runner.run(KUBECTL, &self.args(), &options).await {
            Ok(output) => {
                for line in output.stdout.lines() {
                    debug!("[kubectl] {line}");
                }
                let saved = ctx.save_state(&self.info, state.clone()).await?;
                Ok(ActionResult::new(&self.info, ActionOutcome::Executed).with_state(Some(saved)))
            }
            Err(HerdError::Exec(ExecError::NonZeroExit {
                code,
                stdout,
                stderr,
                ..
            })) if self.info.operation == Operation::Delete => {
                warn!(
                    "kubectl delete {} exited with code {code}, treating as deleted: {}",
                    self.info.identifier,
                    stderr.trim()
                );
                let mut state = state.clone();
                state.capture_output(&stdout, &stderr);
                let saved = ctx.save_state(&self.info, state).await?;
                Ok(ActionResult::new(
                    &self.info,
                    ActionOutcome::Tolerated {
                        code,
                        message: stderr,
                    },
                )
                .with_state(Some(saved)))
            }
            Err(err) => Err(self.info.execution_failed(err)),
        }
    }

    fn can_rollback_execution(&self) -> bool {
        !self.rollouts.is_empty()
    }

    async fn rollback(&self, ctx: &ExecutionContext<'_>) -> Result<Vec<ActionResult>> {
        let mut results = Vec::with_capacity(self.rollouts.len());
        for rollout in &self.rollouts {
            let undo = RolloutUndoAction::new(rollout.clone(), &self.info.environment);
            results.push(undo.execute(None, ctx).await?);
        }
        Ok(results)
    }
}

/// Builder for [`KubectlAction`].
#[derive(Debug, Clone)]
pub struct KubectlActionBuilder {
    text: String,
    operation: Operation,
    environment: String,
    origin: Option<String>,
    version: Option<String>,
    branch: Option<BranchModification>,
    policies: ClusterPolicies,
    templates: TemplateContext,
    source_dir: Option<PathBuf>,
    index: NameChangeIndex,
}

impl KubectlActionBuilder {
    /// Starts a builder for manifest `text`.
    #[must_use]
    pub fn new(text: impl Into<String>, operation: Operation, environment: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            operation,
            environment: environment.into(),
            origin: None,
            version: None,
            branch: None,
            policies: ClusterPolicies::default(),
            templates: TemplateContext::new(),
            source_dir: None,
            index: NameChangeIndex::new(),
        }
    }

    /// Sets the provenance, usually the manifest path.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Sets the version being deployed.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Deploys the manifest as an isolated branch copy.
    #[must_use]
    pub fn with_branch(mut self, branch: BranchModification) -> Self {
        self.branch = Some(branch);
        self
    }

    /// Sets the cluster policies to enforce.
    #[must_use]
    pub fn with_policies(mut self, policies: ClusterPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Sets the variables available to template expansion.
    #[must_use]
    pub fn with_templates(mut self, templates: TemplateContext) -> Self {
        self.templates = templates;
        self
    }

    /// Signs the action by the contents of `dir` instead of the manifest text.
    #[must_use]
    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }

    /// Seeds the branch rename index with names from sibling manifests.
    ///
    /// References to resources defined in those manifests are then
    /// redirected to their branch copies as well.
    #[must_use]
    pub fn with_name_index(mut self, index: NameChangeIndex) -> Self {
        self.index = index;
        self
    }

    /// Expands and parses the manifest without transforming it.
    ///
    /// # Errors
    ///
    /// Returns an error if a placeholder cannot be resolved or the manifest
    /// is malformed.
    pub fn parse_documents(&self) -> Result<Vec<KubeDocument>> {
        let cleaned = self.branch.as_ref().map(BranchModification::cleaned_branch_name);
        let expanded = self.templates.clone().with_branch(cleaned.as_deref()).expand(&self.text)?;
        parse_documents(&expanded, Some(self.origin.as_deref().unwrap_or(DEFAULT_ORIGIN)))
    }

    /// Builds the action.
    ///
    /// # Errors
    ///
    /// Returns an error if a placeholder cannot be resolved, the manifest
    /// is malformed or empty, the branch parameters are incomplete, or the
    /// first document has no name.
    pub fn build(self) -> Result<KubectlAction> {
        let mut documents = self.parse_documents()?;
        let mut origin = self.origin.unwrap_or_else(|| String::from(DEFAULT_ORIGIN));

        if let Some(branch) = &self.branch {
            let mut index = self.index;
            transform_documents(&mut documents, branch, &mut index)?;
            origin = branch.branch_origin();
        }

        self.policies.apply_all(&mut documents);

        let first = documents.first().ok_or_else(|| {
            DocumentError::parse("manifest contains no documents", Some(origin.as_str()))
        })?;
        let identifier = first.identifying_string()?;

        let rollouts: Vec<DeploymentRollout> = documents
            .iter()
            .filter_map(DeploymentRollout::from_document)
            .collect();
        let descriptor = serialize_documents(&documents)?;

        debug!(
            "Built kubectl {} {identifier}: {} document(s), {} rollout(s)",
            self.operation,
            documents.len(),
            rollouts.len()
        );

        Ok(KubectlAction {
            info: ActionInfo {
                identifier,
                origin,
                operation: self.operation,
                descriptor,
                version: self.version.unwrap_or_else(|| String::from(UNVERSIONED)),
                environment: self.environment,
                stateful: true,
                source_dir: self.source_dir,
            },
            documents,
            rollouts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ExecutionOptions;
    use crate::exec::scripted::{Scripted, ScriptedRunner};
    use crate::kube::policy::ENV_POLICY_MAX_REPLICAS;
    use crate::state::{DeploymentStateStore, MemoryStateBackend};

    const MANIFEST: &str = r"
kind: Deployment
metadata:
  name: api
  namespace: shop
spec:
  replicas: 6
  template:
    spec:
      containers:
        - name: api
          image: registry/api:${TAG}
---
kind: Service
metadata:
  name: api
  namespace: shop
";

    fn templates() -> TemplateContext {
        TemplateContext::isolated().with_var("TAG", "1.4.0")
    }

    fn build(operation: Operation) -> KubectlAction {
        KubectlActionBuilder::new(MANIFEST, operation, "dev")
            .with_origin("deploy/api.yaml")
            .with_version("1.4.0")
            .with_templates(templates())
            .build()
            .expect("build")
    }

    #[test]
    fn test_builder_identifies_and_finds_rollouts() {
        let action = build(Operation::Apply);

        assert_eq!(action.info().identifier, "Deployment_shop_api");
        assert_eq!(action.info().origin, "deploy/api.yaml");
        assert!(action.info().descriptor.contains("registry/api:1.4.0"));
        assert_eq!(action.rollouts().len(), 1);
        assert_eq!(action.rollouts()[0].target(), "shop/Deployment/api");
        assert!(action.can_rollback_execution());
        assert_eq!(action.by_kind().len(), 2);
        assert_eq!(action.export_file_name(), "apply-deployment_shop_api.yaml");
    }

    #[test]
    fn test_builder_applies_branch_and_policies() {
        let policies = ClusterPolicies::from_lookup(&|name: &str| {
            (name == ENV_POLICY_MAX_REPLICAS).then(|| String::from("3"))
        })
        .expect("policies");

        let action = KubectlActionBuilder::new(MANIFEST, Operation::Apply, "dev")
            .with_templates(templates())
            .with_branch(BranchModification::new("Feature/One").with_ttl_hours(24))
            .with_policies(policies)
            .build()
            .expect("build");

        assert_eq!(action.info().identifier, "Deployment_shop_api-feature-one");
        assert_eq!(action.info().origin, "branch feature-one");
        assert_eq!(action.info().version, UNVERSIONED);
        let spec = action.documents()[0].spec().expect("spec");
        assert_eq!(spec["replicas"].as_u64(), Some(1));
    }

    #[test]
    fn test_empty_manifest_is_rejected() {
        let err = KubectlActionBuilder::new("---\n", Operation::Apply, "dev")
            .with_templates(TemplateContext::isolated())
            .build()
            .expect_err("empty");

        assert!(matches!(err, HerdError::Document(DocumentError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_execute_requires_state() {
        let runner = ScriptedRunner::default();
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let err = build(Operation::Apply)
            .execute(None, &ctx)
            .await
            .expect_err("no state");

        assert!(matches!(
            err,
            HerdError::Action(ActionError::StateNotAttached { .. })
        ));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_apply_pipes_manifest_and_saves_state() {
        let runner = ScriptedRunner::new([Scripted::Ok(String::from("deployment.apps/api configured"))]);
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let action = build(Operation::Apply);
        let state = store
            .get_deployment_state(&action.info().state_query())
            .await
            .expect("state");
        let result = action.execute(Some(&state), &ctx).await.expect("apply");

        assert_eq!(result.outcome, ActionOutcome::Executed);
        let calls = runner.calls();
        assert_eq!(calls[0].line(), "kubectl apply -f -");
        assert_eq!(calls[0].stdin.as_deref(), Some(action.info().descriptor.as_str()));

        let again = store
            .get_deployment_state(&action.info().state_query())
            .await
            .expect("state");
        assert!(!again.modified);

        let skipped = action.execute(Some(&again), &ctx).await.expect("unchanged");
        assert_eq!(skipped.outcome, ActionOutcome::Unchanged);
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_not_found_is_tolerated() {
        let runner = ScriptedRunner::new([Scripted::fail(
            1,
            "Error from server (NotFound): deployments.apps \"api\" not found",
        )]);
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let action = build(Operation::Delete);
        let state = store
            .get_deployment_state(&action.info().state_query())
            .await
            .expect("state");
        let result = action.execute(Some(&state), &ctx).await.expect("tolerated");

        assert!(result.changed());
        assert!(matches!(result.outcome, ActionOutcome::Tolerated { code: 1, .. }));

        let stored = store
            .get_stored_state("dev", "Deployment_shop_api")
            .await
            .expect("read")
            .expect("saved");
        assert!(stored.stderr.as_deref().is_some_and(|s| s.contains("not found")));
    }

    #[tokio::test]
    async fn test_apply_failure_keeps_payload() {
        let runner = ScriptedRunner::new([Scripted::fail(1, "admission webhook denied")]);
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let action = build(Operation::Apply);
        let state = store
            .get_deployment_state(&action.info().state_query())
            .await
            .expect("state");
        let err = action.execute(Some(&state), &ctx).await.expect_err("fails");

        assert_eq!(err.exit_code(), Some(1));
        match err {
            HerdError::Action(ActionError::ExecutionFailed {
                descriptor, stderr, ..
            }) => {
                assert_eq!(descriptor, action.info().descriptor);
                assert_eq!(stderr, "admission webhook denied");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store
            .get_stored_state("dev", "Deployment_shop_api")
            .await
            .expect("read")
            .is_none());
    }

    #[tokio::test]
    async fn test_dry_run_writes_export() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::default();
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions {
            dry_run: true,
            output_dir: Some(dir.path().to_path_buf()),
            ..ExecutionOptions::default()
        };
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let action = build(Operation::Apply);
        let state = store
            .get_deployment_state(&action.info().state_query())
            .await
            .expect("state");
        let result = action.execute(Some(&state), &ctx).await.expect("dry run");

        let path = dir.path().join("apply-deployment_shop_api.yaml");
        assert_eq!(result.outcome, ActionOutcome::DryRun { path: Some(path.clone()) });
        let written = std::fs::read_to_string(path).expect("export");
        assert_eq!(written, action.info().descriptor);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_undoes_every_rollout() {
        let runner = ScriptedRunner::default();
        let store = DeploymentStateStore::new(Box::new(MemoryStateBackend::new()));
        let options = ExecutionOptions::default();
        let ctx = ExecutionContext::new(&runner, &store, &options);

        let results = build(Operation::Apply).rollback(&ctx).await.expect("rollback");

        assert_eq!(results.len(), 1);
        assert_eq!(runner.lines(), ["kubectl rollout undo -n shop deployment/api"]);
    }
}
