//! S3-based state storage backend.
//!
//! Stores one JSON object per key under an optional prefix, so several
//! machines deploying to the same environment share their state.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{HerdError, Result, StateError};

use super::backend::StateBackend;
use super::types::StoredEntry;

/// S3-based state backend.
#[derive(Debug)]
pub struct S3StateBackend {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix, empty or ending with `/`.
    prefix: String,
}

impl S3StateBackend {
    /// Creates a new S3 state backend from the ambient AWS configuration.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a new S3 state backend with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    /// Gets the full object key for a state key.
    fn object_key(&self, key: &str) -> String {
        format!("{}{key}.json", self.prefix)
    }
}

/// Normalizes a prefix to either empty or `segment/`.
fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| {
            let p = p.trim_matches('/');
            if p.is_empty() {
                String::new()
            } else {
                format!("{p}/")
            }
        })
        .unwrap_or_default()
}

#[async_trait]
impl StateBackend for S3StateBackend {
    async fn connect(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                HerdError::State(StateError::s3(format!(
                    "Cannot reach bucket {}: {}",
                    self.bucket,
                    e.into_service_error()
                )))
            })?;

        info!("Using S3 state in s3://{}/{}", self.bucket, self.prefix);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        let object_key = self.object_key(key);
        debug!("Loading state from s3://{}/{object_key}", self.bucket);

        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    return Ok(None);
                }
                return Err(HerdError::State(StateError::s3(format!(
                    "S3 get error: {service_err}"
                ))));
            }
        };

        let bytes = response.body.collect().await.map_err(|e| {
            HerdError::State(StateError::s3(format!("Failed to read S3 object: {e}")))
        })?;

        let entry: StoredEntry = serde_json::from_slice(&bytes.into_bytes()).map_err(|e| {
            HerdError::State(StateError::Corrupted {
                message: format!("Failed to parse s3://{}/{object_key}: {e}", self.bucket),
            })
        })?;

        Ok(Some(entry))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<StoredEntry> {
        let object_key = self.object_key(key);
        let entry = StoredEntry {
            key: key.to_string(),
            value,
        };

        let content = serde_json::to_vec_pretty(&entry).map_err(|e| {
            HerdError::State(StateError::serialization(format!(
                "Failed to serialize state: {e}"
            )))
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(content.into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| HerdError::State(StateError::s3(format!("S3 put error: {e}"))))?;

        debug!("Saved state to s3://{}/{object_key}", self.bucket);
        Ok(entry)
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("herd/state/")), "herd/state/");
        assert_eq!(normalize_prefix(Some("/herd")), "herd/");
    }
}
