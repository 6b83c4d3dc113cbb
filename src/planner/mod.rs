//! Planning module for deployment operations.
//!
//! This module turns images and manifests into ordered deployment plans,
//! executes them, and records queued deployments.

mod image;
mod plan;
mod queue;

pub use image::{DeploymentType, ImageManifest, ImagePlanner};
pub use plan::{DeploymentPlan, PlanResult, PlannedAction};
pub use queue::{DeploymentQueue, QueuedDeployment};
