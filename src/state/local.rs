//! Local file-based state storage backend.
//!
//! Each key is stored as its own JSON file inside a state directory, which
//! suits local development and single-machine orchestrators.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{HerdError, Result, StateError};

use super::backend::StateBackend;
use super::types::StoredEntry;

/// Default state directory name.
const STATE_DIR: &str = ".herd";

/// Local file-based state backend.
#[derive(Debug)]
pub struct LocalStateBackend {
    /// Directory holding one file per key.
    base_dir: PathBuf,
}

impl LocalStateBackend {
    /// Creates a backend in `.herd/` under the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| HerdError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a backend with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Path of the file holding `key`.
    fn entry_path(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.base_dir.join(format!("{file_name}.json"))
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                HerdError::State(StateError::backend(format!(
                    "Failed to create state directory: {e}"
                )))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateBackend for LocalStateBackend {
    async fn connect(&self) -> Result<()> {
        info!("Using local state in {}", self.base_dir.display());
        self.ensure_dir().await
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        let path = self.entry_path(key);
        if !path.exists() {
            debug!("No state stored for {key}");
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await.map_err(|e| {
            HerdError::State(StateError::backend(format!(
                "Failed to read {}: {e}",
                path.display()
            )))
        })?;

        let entry: StoredEntry = serde_json::from_str(&content).map_err(|e| {
            HerdError::State(StateError::Corrupted {
                message: format!("Failed to parse {}: {e}", path.display()),
            })
        })?;

        Ok(Some(entry))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<StoredEntry> {
        self.ensure_dir().await?;

        let entry = StoredEntry {
            key: key.to_string(),
            value,
        };
        let content = serde_json::to_string_pretty(&entry).map_err(|e| {
            HerdError::State(StateError::serialization(format!(
                "Failed to serialize state: {e}"
            )))
        })?;

        let path = self.entry_path(key);
        // Write to a temporary file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            HerdError::State(StateError::backend(format!(
                "Failed to create temp state file: {e}"
            )))
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            HerdError::State(StateError::backend(format!("Failed to write state file: {e}")))
        })?;

        file.sync_all().await.map_err(|e| {
            HerdError::State(StateError::backend(format!("Failed to sync state file: {e}")))
        })?;

        fs::rename(&temp_path, &path).await.map_err(|e| {
            HerdError::State(StateError::backend(format!(
                "Failed to rename state file: {e}"
            )))
        })?;

        debug!("Saved state for {key} to {}", path.display());
        Ok(entry)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_backend() -> (LocalStateBackend, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let backend = LocalStateBackend::with_base_dir(temp_dir.path().join("state"));
        (backend, temp_dir)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (backend, _temp) = create_test_backend();

        backend
            .set("dev-Deployment_api", json!({"version": "1.0.0"}))
            .await
            .expect("Failed to save state");

        let entry = backend
            .get("dev-Deployment_api")
            .await
            .expect("Failed to load state")
            .expect("State should exist");

        assert_eq!(entry.key, "dev-Deployment_api");
        assert_eq!(entry.value["version"], "1.0.0");
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (backend, _temp) = create_test_backend();

        let result = backend.get("dev-missing").await.expect("Get should not fail");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_keys_with_path_characters() {
        let (backend, temp) = create_test_backend();

        backend
            .set("dev-registry/app:latest", json!(1))
            .await
            .expect("set");

        assert!(temp.path().join("state/dev-registry_app_latest.json").exists());
        let entry = backend
            .get("dev-registry/app:latest")
            .await
            .expect("get")
            .expect("entry");
        assert_eq!(entry.key, "dev-registry/app:latest");
    }

    #[tokio::test]
    async fn test_corrupted_entry() {
        let (backend, _temp) = create_test_backend();
        backend.connect().await.expect("connect");
        std::fs::write(backend.entry_path("dev-bad"), "not json").expect("write");

        let result = backend.get("dev-bad").await;
        assert!(matches!(
            result,
            Err(HerdError::State(StateError::Corrupted { .. }))
        ));
    }
}
