//! Configuration module for the herd deployment system.
//!
//! This module handles everything an invocation is configured with:
//! - Reading settings and cluster policies from the environment
//! - Expanding placeholders in manifest text
//! - Computing deployment signatures for change detection

mod hash;
mod settings;
mod template;

pub use hash::SignatureHasher;
pub use settings::{
    Settings, ENV_ANNOTATION_RETRY_DELAY_MS, ENV_DOCKER_ENV, ENV_DRY_RUN_DIR, ENV_ENVIRONMENT,
    ENV_ROLLOUT_TIMEOUT_SECS, ENV_WAIT_FOR_ROLLOUT,
};
pub(crate) use settings::{parse_bool, parse_number};
pub use template::{
    TemplateContext, BRANCH_NAME, BRANCH_NAME_POSTFIX, BRANCH_NAME_PREFIX, IMAGE_TAG,
};
