//! Storage backend trait definition.
//!
//! This module defines the key/value interface the deployment state store
//! is built on.

use async_trait::async_trait;

use crate::error::Result;
use super::types::StoredEntry;

/// Trait for state storage backends.
///
/// Backends are assumed to serialize concurrent writes to the same key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Prepares the backend for use.
    async fn connect(&self) -> Result<()>;

    /// Releases backend resources.
    async fn disconnect(&self) -> Result<()>;

    /// Gets the entry stored under `key`.
    ///
    /// Returns `None` if nothing is stored there.
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>>;

    /// Stores `value` under `key` and returns the stored entry.
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<StoredEntry>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
