//! Plans for deploying one image.
//!
//! An image carries a manifest, decoded from its labels by the caller,
//! that says how it is deployed: either by running the image once as a
//! deployer or by applying the Kubernetes files it ships. Optional test
//! commands run before and after the deployment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::action::DeploymentAction;
use crate::config::{Settings, TemplateContext, IMAGE_TAG};
use crate::docker::{split_image, DockerRole, DockerRunBuilder, DockerTestAction};
use crate::error::{ActionError, ConfigError, HerdError, Result};
use crate::kube::{
    BranchModification, ClusterPolicies, KubectlActionBuilder, NameChangeIndex, RolloutUndoAction,
};
use crate::state::{DeploymentStateStore, Operation};

use super::plan::DeploymentPlan;

/// How an image is deployed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentType {
    /// The image is run once with its deploy command.
    #[default]
    Deployer,
    /// The image ships Kubernetes manifests.
    #[serde(alias = "k8s")]
    Kubernetes,
}

/// Deployment instructions carried by an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// How the image is deployed.
    #[serde(default)]
    pub deployment_type: DeploymentType,
    /// Manifest file name to manifest text.
    #[serde(default)]
    pub kube_deployment_files: BTreeMap<String, String>,
    /// Command run by a deployer image.
    #[serde(default)]
    pub deploy_command: Option<String>,
    /// Command reverting a deployer image.
    #[serde(default)]
    pub rollback_command: Option<String>,
    /// Command run before deploying.
    #[serde(default)]
    pub pre_deploy_test: Option<String>,
    /// Command run after deploying.
    #[serde(default)]
    pub post_deploy_test: Option<String>,
}

impl ImageManifest {
    /// Parses a manifest from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not describe a manifest.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            HerdError::Config(ConfigError::ParseError {
                message: e.to_string(),
                location: Some(format!("line {}, column {}", e.line(), e.column())),
            })
        })
    }

    /// Reads a manifest from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_json(&text)
    }
}

/// Turns an image and its manifest into a deployment plan.
#[derive(Debug, Clone)]
pub struct ImagePlanner {
    environment: String,
    templates: TemplateContext,
    policies: ClusterPolicies,
    branch: Option<BranchModification>,
    docker_env: Option<String>,
    annotate_rollouts: bool,
    annotation_retry_delay: Duration,
}

impl ImagePlanner {
    /// Creates a planner for `environment`.
    #[must_use]
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            templates: TemplateContext::new(),
            policies: ClusterPolicies::default(),
            branch: None,
            docker_env: None,
            annotate_rollouts: false,
            annotation_retry_delay: Settings::default().annotation_retry_delay,
        }
    }

    /// Creates a planner configured from `settings`.
    #[must_use]
    pub fn from_settings(environment: impl Into<String>, settings: &Settings) -> Self {
        Self {
            policies: settings.policies.clone(),
            docker_env: settings.docker_env.clone(),
            annotation_retry_delay: settings.annotation_retry_delay,
            ..Self::new(environment)
        }
    }

    /// Sets the variables available to template expansion.
    #[must_use]
    pub fn with_templates(mut self, templates: TemplateContext) -> Self {
        self.templates = templates;
        self
    }

    /// Sets the cluster policies applied to shipped manifests.
    #[must_use]
    pub fn with_policies(mut self, policies: ClusterPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Deploys shipped manifests as a branch copy.
    #[must_use]
    pub fn with_branch(mut self, branch: BranchModification) -> Self {
        self.branch = Some(branch);
        self
    }

    /// Sets the expansion string passed to every container run.
    #[must_use]
    pub fn with_docker_env(mut self, docker_env: impl Into<String>) -> Self {
        self.docker_env = Some(docker_env.into());
        self
    }

    /// Annotates Deployments with the deployment time after their rollout.
    #[must_use]
    pub const fn with_rollout_annotation(mut self, enabled: bool) -> Self {
        self.annotate_rollouts = enabled;
        self
    }

    /// Builds the plan for `image`.
    ///
    /// The plan runs the pre-deploy test, then the deployment itself, then
    /// the post-deploy test. A failing post-deploy test runs the rollback
    /// command of a deployer image, or undoes the rollouts of a Kubernetes
    /// image.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest lacks what its deployment type
    /// needs, an action cannot be built, or a state lookup fails.
    pub async fn plan_image(
        &self,
        image: &str,
        manifest: &ImageManifest,
        store: &DeploymentStateStore,
    ) -> Result<DeploymentPlan> {
        let (repository, tag) = split_image(image);
        let version = tag.unwrap_or("latest");
        let templates = self.templates.clone().with_var(IMAGE_TAG, version);

        let mut plan = DeploymentPlan::new(repository)
            .with_rollout_annotation(self.annotate_rollouts, self.annotation_retry_delay);

        if let Some(command) = &manifest.pre_deploy_test {
            let test = self
                .container(image, DockerRole::PreDeployTest, command)
                .build(&templates)?;
            plan.add_action(DockerTestAction::new(test), store).await?;
        }

        let rollback = match manifest.deployment_type {
            DeploymentType::Deployer => {
                let command = manifest.deploy_command.as_deref().ok_or_else(|| {
                    HerdError::Action(ActionError::MissingField {
                        action: format!("deployer image {image}"),
                        field: String::from("deployCommand"),
                    })
                })?;
                let deployer = self
                    .container(image, DockerRole::Deployer, command)
                    .with_version(version)
                    .stateful(true)
                    .build(&templates)?;
                plan.add_action(deployer, store).await?;

                match &manifest.rollback_command {
                    Some(command) => vec![DeploymentAction::from(
                        self.container(image, DockerRole::Rollback, command)
                            .with_version(version)
                            .build(&templates)?,
                    )],
                    None => Vec::new(),
                }
            }
            DeploymentType::Kubernetes => {
                if manifest.kube_deployment_files.is_empty() {
                    return Err(HerdError::Action(ActionError::MissingField {
                        action: format!("kubernetes image {image}"),
                        field: String::from("kubeDeploymentFiles"),
                    }));
                }

                let mut builders = Vec::with_capacity(manifest.kube_deployment_files.len());
                for (file, text) in &manifest.kube_deployment_files {
                    let mut builder = KubectlActionBuilder::new(
                        text.as_str(),
                        Operation::Apply,
                        self.environment.as_str(),
                    )
                    .with_origin(format!("{image} {file}"))
                    .with_version(version)
                    .with_templates(templates.clone())
                    .with_policies(self.policies.clone());
                    if let Some(branch) = &self.branch {
                        builder = builder.with_branch(branch.clone());
                    }
                    builders.push(builder);
                }

                // The files of one image form one manifest set for branch renames.
                let mut index = NameChangeIndex::new();
                if let Some(branch) = &self.branch {
                    for builder in &builders {
                        index.index_documents(&builder.parse_documents()?, branch)?;
                    }
                }

                let mut undo = Vec::new();
                for builder in builders {
                    let action = builder.with_name_index(index.clone()).build()?;
                    undo.extend(action.rollouts().iter().map(|r| {
                        DeploymentAction::from(RolloutUndoAction::new(r.clone(), &self.environment))
                    }));
                    plan.add_action(action, store).await?;
                }
                undo
            }
        };

        if let Some(command) = &manifest.post_deploy_test {
            let test = self
                .container(image, DockerRole::PostDeployTest, command)
                .build(&templates)?;
            plan.add_action(DockerTestAction::new(test).with_rollback(rollback), store)
                .await?;
        }

        info!(
            "Planned {} action(s) for {image} ({:?})",
            plan.actions().len(),
            manifest.deployment_type
        );
        Ok(plan)
    }

    fn container(&self, image: &str, role: DockerRole, command: &str) -> DockerRunBuilder {
        let mut builder = DockerRunBuilder::new(image, self.environment.as_str())
            .with_role(role)
            .with_command(command);
        if let Some(expansion) = &self.docker_env {
            builder = builder.with_expansion(expansion.as_str());
        }
        builder
    }
}
