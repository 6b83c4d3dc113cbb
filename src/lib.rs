// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Herd Deploy
//!
//! An idempotent, state-tracked deployment orchestrator for container images
//! and Kubernetes manifests.
//!
//! ## Overview
//!
//! Herd deploys two kinds of units:
//!
//! - Images run once as deployers (migrations, installs, tests) with `docker run`
//! - Kubernetes manifests applied or deleted with `kubectl`
//!
//! Every stateful action is signed by hashing its operation and payload. The
//! signature is stored per environment and resource, so re-running an
//! unchanged deployment does nothing.
//!
//! ## Architecture
//!
//! 1. **Builders** turn manifests and images into immutable actions
//! 2. **Plans** attach the prior state of each action and add rollout waits
//! 3. **Actions** run strictly in order through a [`exec::CommandRunner`]
//!
//! ## Modules
//!
//! - [`config`]: Settings, template expansion and signatures
//! - [`state`]: Deployment state store and its backends (memory, local, S3)
//! - [`exec`]: External command execution
//! - [`action`]: The action protocol shared by every action
//! - [`docker`]: Container-run actions
//! - [`kube`]: Manifest documents, branch rewrites, policies and kubectl actions
//! - [`planner`]: Deployment plans, image planning and the deployment queue
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! # deploy/api.yaml, applied with `herd -e dev apply deploy/api.yaml --wait`
//! apiVersion: apps/v1
//! kind: Deployment
//! metadata:
//!   name: api
//! spec:
//!   replicas: 2
//!   template:
//!     spec:
//!       containers:
//!         - name: api
//!           image: registry.example.com/api:${IMAGE_TAG}
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod action;
pub mod cli;
pub mod config;
pub mod docker;
pub mod error;
pub mod exec;
pub mod kube;
pub mod planner;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use action::{ActionResult, DeploymentAction, Executable, ExecutionContext, ExecutionOptions};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{Settings, SignatureHasher, TemplateContext};
pub use error::{HerdError, Result};
pub use kube::{BranchModification, ClusterPolicies, KubectlActionBuilder};
pub use planner::{DeploymentPlan, DeploymentQueue, ImageManifest, ImagePlanner};
pub use state::{DeploymentState, DeploymentStateStore, StateBackend};
