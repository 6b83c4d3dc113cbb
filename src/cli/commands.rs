//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Herd - idempotent deployments of container images and Kubernetes manifests.
#[derive(Parser, Debug)]
#[command(name = "herd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Target environment.
    #[arg(short, long, global = true, env = "HERD_ENVIRONMENT")]
    pub environment: Option<String>,

    /// `.env` file to load before reading settings.
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Directory of the local state backend.
    #[arg(long, global = true, env = "HERD_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// S3 bucket of the remote state backend.
    #[arg(long, global = true, env = "HERD_STATE_BUCKET")]
    pub state_bucket: Option<String>,

    /// Key prefix inside the state bucket.
    #[arg(long, global = true, env = "HERD_STATE_PREFIX")]
    pub state_prefix: Option<String>,

    /// Region of the state bucket.
    #[arg(long, global = true, env = "HERD_STATE_REGION")]
    pub state_region: Option<String>,

    /// Describe the deployment without running docker or kubectl.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Directory receiving dry-run exports.
    #[arg(long, global = true)]
    pub export_dir: Option<PathBuf>,

    /// Wait for Deployment rollouts to finish.
    #[arg(long, global = true)]
    pub wait: bool,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply manifest files or folders with kubectl.
    Apply {
        /// Manifest files or folders of manifests.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Deploy an isolated copy for this branch.
        #[arg(long, requires = "ttl")]
        branch: Option<String>,

        /// Lifetime of the branch copy in hours.
        #[arg(long)]
        ttl: Option<u32>,

        /// Version recorded in the deployment state.
        #[arg(long)]
        version: Option<String>,

        /// Annotate Deployments with the deployment time.
        #[arg(long)]
        annotate: bool,
    },

    /// Delete the resources of manifest files or folders.
    Delete {
        /// Manifest files or folders of manifests.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Version recorded in the deployment state.
        #[arg(long)]
        version: Option<String>,
    },

    /// Run an image once as a deployer.
    Run {
        /// Image reference.
        image: String,

        /// Command passed to the container.
        #[arg(short, long)]
        command: Option<String>,

        /// Extra environment variable (`NAME=VALUE`).
        #[arg(long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
    },

    /// Deploy an image as described by its manifest.
    Image {
        /// Image reference.
        image: String,

        /// JSON manifest of the image.
        #[arg(short, long)]
        manifest: PathBuf,

        /// Deploy shipped manifests as a copy for this branch.
        #[arg(long, requires = "ttl")]
        branch: Option<String>,

        /// Lifetime of the branch copy in hours.
        #[arg(long)]
        ttl: Option<u32>,

        /// Annotate Deployments with the deployment time.
        #[arg(long)]
        annotate: bool,
    },

    /// Manage the deployment queue.
    Queue {
        /// Queue subcommand.
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Inspect deployment state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// Deployment queue subcommands.
#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// Queue an image for deployment.
    Push {
        /// Image reference.
        image: String,

        /// Key identifying the deployment unit.
        #[arg(long)]
        key: String,

        /// Description of the herd entry.
        #[arg(long, default_value = "")]
        description: String,

        /// Version; defaults to the image tag.
        #[arg(long)]
        version: Option<String>,

        /// Queue file.
        #[arg(long, env = "HERD_QUEUE_FILE", default_value = "deployments.jsonl")]
        file: PathBuf,
    },

    /// List queued deployments.
    List {
        /// Queue file.
        #[arg(long, env = "HERD_QUEUE_FILE", default_value = "deployments.jsonl")]
        file: PathBuf,
    },
}

/// State subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the stored state of a resource.
    Show {
        /// Resource identifier, e.g. `Deployment_api`.
        identifier: String,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Parses a `NAME=VALUE` argument.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    if name.trim().is_empty() {
        return Err(format!("missing variable name in '{s}'"));
    }
    Ok((name.trim().to_string(), value.to_string()))
}
