//! Docker container-run actions.
//!
//! This module builds one-shot `docker run` actions used as deployers,
//! rollback commands, and pre/post deployment tests.

mod run;
mod test_action;

pub use run::{split_image, DockerRole, DockerRunAction, DockerRunBuilder};
pub use test_action::DockerTestAction;
