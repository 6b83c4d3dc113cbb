//! Deployment signature hashing for change detection.
//!
//! A signature is the SHA-256 of an operation name followed by the exact
//! payload handed to the external tool. Two deployments with the same
//! signature and version are considered identical.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{HerdError, Result, StateError};

/// Hasher for computing deployment signatures.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignatureHasher;

impl SignatureHasher {
    /// Creates a new signature hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the signature of an in-memory descriptor.
    #[must_use]
    pub fn signature(&self, operation: &str, descriptor: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());
        hasher.update(descriptor.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes the signature of a directory descriptor.
    ///
    /// Every regular file directly inside `dir` is hashed on its own, and the
    /// per-file hashes are appended to the operation in file-name order. The
    /// directory path itself does not take part, so two directories with the
    /// same files and contents share a signature.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or one of its files cannot be read.
    pub async fn directory_signature(&self, operation: &str, dir: &Path) -> Result<String> {
        let files = list_files(dir).await?;
        debug!("Hashing {} file(s) in {}", files.len(), dir.display());

        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());

        for path in files {
            let content = fs::read(&path).await.map_err(|e| {
                HerdError::State(StateError::backend(format!(
                    "Failed to read {} for hashing: {e}",
                    path.display()
                )))
            })?;
            hasher.update(hex::encode(Sha256::digest(&content)).as_bytes());
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Lists regular files in `dir`, sorted by file name.
async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| {
        HerdError::State(StateError::backend(format!(
            "Failed to list {}: {e}",
            dir.display()
        )))
    })?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_signature_deterministic() {
        let hasher = SignatureHasher::new();

        let hash1 = hasher.signature("apply", "kind: Service");
        let hash2 = hasher.signature("apply", "kind: Service");

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_operation_is_part_of_signature() {
        let hasher = SignatureHasher::new();

        let apply = hasher.signature("apply", "kind: Service");
        let delete = hasher.signature("delete", "kind: Service");

        assert_ne!(apply, delete);
    }

    #[tokio::test]
    async fn test_directory_signature_ignores_location() {
        let hasher = SignatureHasher::new();
        let first = TempDir::new().expect("temp dir");
        let second = TempDir::new().expect("temp dir");

        for dir in [&first, &second] {
            std::fs::write(dir.path().join("a.yaml"), "kind: ConfigMap").expect("write");
            std::fs::write(dir.path().join("b.yaml"), "kind: Service").expect("write");
        }

        let sig1 = hasher
            .directory_signature("apply", first.path())
            .await
            .expect("signature");
        let sig2 = hasher
            .directory_signature("apply", second.path())
            .await
            .expect("signature");

        assert_eq!(sig1, sig2);
    }

    #[tokio::test]
    async fn test_directory_signature_tracks_content() {
        let hasher = SignatureHasher::new();
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("a.yaml"), "replicas: 1").expect("write");

        let before = hasher
            .directory_signature("apply", dir.path())
            .await
            .expect("signature");

        std::fs::write(dir.path().join("a.yaml"), "replicas: 2").expect("write");
        let after = hasher
            .directory_signature("apply", dir.path())
            .await
            .expect("signature");

        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_directory_signature_missing_dir() {
        let hasher = SignatureHasher::new();
        let result = hasher
            .directory_signature("apply", Path::new("/nonexistent/herd"))
            .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_short_hash() {
        let hasher = SignatureHasher::new();
        assert_eq!(hasher.short_hash("abcdef1234567890"), "abcdef12");
    }

    #[test]
    fn test_hashes_match() {
        assert!(SignatureHasher::hashes_match("abc123", "abc123"));
        assert!(!SignatureHasher::hashes_match("abc123", "abc124"));
        assert!(!SignatureHasher::hashes_match("abc123", "abc12"));
    }
}
