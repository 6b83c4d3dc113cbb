//! In-memory state storage backend.
//!
//! Nothing outlives the process. Handy for tests and throwaway runs.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::Result;

use super::backend::StateBackend;
use super::types::StoredEntry;

/// In-memory state backend.
#[derive(Debug, Default)]
pub struct MemoryStateBackend {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStateBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if nothing has been stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        Ok(self.entries.read().await.get(key).map(|value| StoredEntry {
            key: key.to_string(),
            value: value.clone(),
        }))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<StoredEntry> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(StoredEntry {
            key: key.to_string(),
            value,
        })
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
