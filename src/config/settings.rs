//! Runtime settings read from the process environment.
//!
//! Settings are read once per invocation. Everything that depends on them,
//! including cluster policies, sees the same snapshot for the whole run even
//! if the environment changes underneath.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::action::ExecutionOptions;
use crate::error::{ConfigError, HerdError, Result};
use crate::kube::ClusterPolicies;

/// Target environment name (passed to deployers as `ENV`).
pub const ENV_ENVIRONMENT: &str = "HERD_ENVIRONMENT";

/// Directory receiving dry-run exports.
pub const ENV_DRY_RUN_DIR: &str = "HERD_DRY_RUN_DIR";

/// Whether applied deployments are followed by a rollout wait.
pub const ENV_WAIT_FOR_ROLLOUT: &str = "HERD_WAIT_FOR_ROLLOUT";

/// Timeout handed to `kubectl rollout status`.
pub const ENV_ROLLOUT_TIMEOUT_SECS: &str = "HERD_ROLLOUT_TIMEOUT_SECS";

/// Delay between deployment annotation attempts.
pub const ENV_ANNOTATION_RETRY_DELAY_MS: &str = "HERD_ANNOTATION_RETRY_DELAY_MS";

/// Comma-separated `NAME=VALUE` pairs passed to every deployer container.
pub const ENV_DOCKER_ENV: &str = "HERD_DOCKER_ENV";

/// Default delay between annotation attempts.
const DEFAULT_ANNOTATION_RETRY_DELAY_MS: u64 = 2000;

/// Settings for one orchestrator invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Target environment name.
    pub environment: Option<String>,
    /// Directory receiving dry-run exports.
    pub dry_run_dir: Option<PathBuf>,
    /// Whether rollouts are waited for.
    pub wait_for_rollout: bool,
    /// Optional rollout status timeout in seconds.
    pub rollout_timeout_secs: Option<u64>,
    /// Delay between annotation attempts.
    pub annotation_retry_delay: Duration,
    /// Deployer environment expansion string.
    pub docker_env: Option<String>,
    /// Cluster-wide document policies.
    pub policies: ClusterPolicies,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: None,
            dry_run_dir: None,
            wait_for_rollout: false,
            rollout_timeout_secs: None,
            annotation_retry_delay: Duration::from_millis(DEFAULT_ANNOTATION_RETRY_DELAY_MS),
            docker_env: None,
            policies: ClusterPolicies::default(),
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(env) = non_empty(lookup(ENV_ENVIRONMENT)) {
            debug!("Environment set to {env}");
            settings.environment = Some(env);
        }

        settings.dry_run_dir = non_empty(lookup(ENV_DRY_RUN_DIR)).map(PathBuf::from);

        if let Some(value) = lookup(ENV_WAIT_FOR_ROLLOUT) {
            settings.wait_for_rollout = parse_bool(ENV_WAIT_FOR_ROLLOUT, &value)?;
        }

        if let Some(value) = non_empty(lookup(ENV_ROLLOUT_TIMEOUT_SECS)) {
            settings.rollout_timeout_secs = Some(parse_number(ENV_ROLLOUT_TIMEOUT_SECS, &value)?);
        }

        if let Some(value) = non_empty(lookup(ENV_ANNOTATION_RETRY_DELAY_MS)) {
            settings.annotation_retry_delay =
                Duration::from_millis(parse_number(ENV_ANNOTATION_RETRY_DELAY_MS, &value)?);
        }

        settings.docker_env = non_empty(lookup(ENV_DOCKER_ENV));
        settings.policies = ClusterPolicies::from_lookup(&lookup)?;

        Ok(settings)
    }

    /// Loads a `.env` file into the process environment.
    ///
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_dotenv(path: Option<&Path>) -> Result<()> {
        let result = match path {
            Some(path) if path.exists() => dotenvy::from_path(path).map(|()| Some(path.to_path_buf())),
            Some(_) => return Ok(()),
            None => dotenvy::dotenv().map(Some),
        };

        match result {
            Ok(Some(loaded)) => {
                info!("Loaded environment from {}", loaded.display());
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) if e.not_found() => Ok(()),
            Err(e) => Err(HerdError::Config(ConfigError::ParseError {
                message: format!("Failed to load .env: {e}"),
                location: path.map(|p| p.display().to_string()),
            })),
        }
    }

    /// Returns the environment name, failing if it is not configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] when no environment is set.
    pub fn require_environment(&self) -> Result<&str> {
        self.environment.as_deref().ok_or_else(|| {
            HerdError::Config(ConfigError::MissingEnvVar {
                name: ENV_ENVIRONMENT.to_string(),
            })
        })
    }

    /// Builds the execution options handed to every action.
    #[must_use]
    pub fn execution_options(&self, dry_run: bool) -> ExecutionOptions {
        ExecutionOptions {
            dry_run,
            output_dir: self.dry_run_dir.clone(),
            wait_for_rollout: self.wait_for_rollout,
            rollout_timeout_secs: self.rollout_timeout_secs,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parses a boolean flag.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] for anything but the usual spellings.
pub(crate) fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(name, value, "expected a boolean").into()),
    }
}

/// Parses an unsigned number.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if `value` is not a number.
pub(crate) fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(name, value, "expected a non-negative integer").into())
}
