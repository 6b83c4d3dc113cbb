//! Kubernetes manifest handling and kubectl actions.
//!
//! This module covers:
//! - Parsing manifests into typed documents
//! - Branch rewrites and cluster policies
//! - `kubectl apply`/`delete` actions and the rollout helpers that follow them

mod annotate;
mod branch;
mod document;
mod kubectl;
mod policy;
mod rollout;

/// Program invoked by kubectl actions.
pub(crate) const KUBECTL: &str = "kubectl";

pub use annotate::{
    TimeAnnotationAction, ANNOTATION_ATTEMPTS, DEFAULT_ANNOTATION_RETRY_DELAY,
    DEPLOYMENT_TIMESTAMP_ANNOTATION,
};
pub use branch::{
    clean_branch_name, transform, transform_documents, BranchModification, NameChangeIndex,
    TTL_LABEL,
};
pub use document::{
    group_by_kind, parse_documents, serialize_documents, KubeDocument, ObjectMeta, ResourceKind,
    DEFAULT_NAMESPACE,
};
pub use kubectl::{KubectlAction, KubectlActionBuilder, UNVERSIONED};
pub use policy::{
    ClusterPolicies, CpuQuantity, ENV_POLICY_CLEAR_PUBLIC_IP_ALLOWLIST, ENV_POLICY_MAX_CPU_REQUEST,
    ENV_POLICY_MAX_REPLICAS, PUBLIC_SERVICE_LABEL,
};
pub use rollout::{DeploymentRollout, RolloutUndoAction, RolloutWaitAction};
