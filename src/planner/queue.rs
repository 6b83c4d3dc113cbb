//! Append-only deployment queue.
//!
//! Each queued deployment is one JSON object on its own line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{HerdError, Result, StateError};

/// A deployment waiting to be picked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedDeployment {
    /// Image reference to deploy.
    pub docker_image_url: String,
    /// Version of the image.
    pub semantic_version: String,
    /// Key identifying the deployment unit.
    pub deployment_key: String,
    /// Description of the herd entry that produced it.
    pub herd_description: String,
    /// When it was queued.
    pub queued_at: DateTime<Utc>,
}

impl QueuedDeployment {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(
        docker_image_url: impl Into<String>,
        semantic_version: impl Into<String>,
        deployment_key: impl Into<String>,
        herd_description: impl Into<String>,
    ) -> Self {
        Self {
            docker_image_url: docker_image_url.into(),
            semantic_version: semantic_version.into(),
            deployment_key: deployment_key.into(),
            herd_description: herd_description.into(),
            queued_at: Utc::now(),
        }
    }
}

/// JSON-lines file of queued deployments.
#[derive(Debug, Clone)]
pub struct DeploymentQueue {
    path: PathBuf,
}

impl DeploymentQueue {
    /// Opens the queue at `path`; the file is created on first push.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the queue file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one deployment.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be serialized or written.
    pub async fn push(&self, deployment: &QueuedDeployment) -> Result<()> {
        let mut line = serde_json::to_string(deployment)
            .map_err(|e| HerdError::State(StateError::serialization(e.to_string())))?;
        line.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(
            "Queued {} as {}",
            deployment.docker_image_url, deployment.deployment_key
        );
        Ok(())
    }

    /// Reads every queued deployment, oldest first.
    ///
    /// A missing file is an empty queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a line is malformed.
    pub async fn read_all(&self) -> Result<Vec<QueuedDeployment>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| {
                    HerdError::State(StateError::Corrupted {
                        message: format!("{}:{}: {e}", self.path.display(), i + 1),
                    })
                })
            })
            .collect()
    }
}
