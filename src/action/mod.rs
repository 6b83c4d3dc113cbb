//! Action protocol shared by every deployment action.
//!
//! Container runs, kubectl applies and rollout helpers all implement
//! [`Executable`]; a plan holds them as [`DeploymentAction`] values.

mod executable;
mod types;

pub use executable::{DeploymentAction, Executable};
pub use types::{
    write_export, ActionInfo, ActionOutcome, ActionResult, ExecutionContext, ExecutionOptions,
};
