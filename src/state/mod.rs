//! State management module for the herd deployment system.
//!
//! This module tracks what was last deployed for every resource so that
//! unchanged resources are skipped and changed ones are applied once.

mod backend;
mod local;
mod memory;
mod s3;
mod store;
mod types;

pub use backend::StateBackend;
pub use local::LocalStateBackend;
pub use memory::MemoryStateBackend;
pub use s3::S3StateBackend;
pub use store::DeploymentStateStore;
pub use types::{state_key, DeploymentState, Descriptor, Operation, StateQuery, StoredEntry};

#[cfg(test)]
pub(crate) use backend::MockStateBackend;
