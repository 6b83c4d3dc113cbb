//! State types for tracking per-resource deployment state.
//!
//! A [`DeploymentState`] records what was last deployed for one resource in
//! one environment, and whether the candidate deployment differs from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::SignatureHasher;

/// Operation performed by a deployment action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// `kubectl apply`.
    Apply,
    /// `kubectl delete`.
    Delete,
    /// One-shot `docker run`.
    Run,
}

impl Operation {
    /// Returns the wire name of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Delete => "delete",
            Self::Run => "run",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a deployment sends to its external tool.
#[derive(Debug, Clone, Copy)]
pub enum Descriptor<'a> {
    /// In-memory payload, such as manifest text or a command line.
    Text(&'a str),
    /// A directory whose file contents make up the payload.
    Directory(&'a Path),
}

/// Parameters for looking up the state of a candidate deployment.
#[derive(Debug, Clone, Copy)]
pub struct StateQuery<'a> {
    /// Environment name.
    pub env: &'a str,
    /// Stable resource identifier.
    pub identifier: &'a str,
    /// Operation to perform.
    pub operation: Operation,
    /// Version being deployed.
    pub version: &'a str,
    /// Payload used for the signature.
    pub descriptor: Descriptor<'a>,
    /// Human-readable provenance.
    pub origin: &'a str,
}

/// A raw entry as held by a storage backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEntry {
    /// Storage key.
    pub key: String,
    /// Stored JSON value.
    pub value: serde_json::Value,
}

/// Deployment state of one resource in one environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentState {
    /// Storage key (`{env}-{identifier}`).
    pub key: String,
    /// Environment name.
    pub env: String,
    /// Stable resource identifier.
    pub identifier: String,
    /// Operation of this deployment.
    pub operation: Operation,
    /// Version of this deployment.
    pub version: String,
    /// Hash of operation and descriptor.
    pub signature: String,
    /// Provenance of the deployment.
    #[serde(default)]
    pub origin: String,
    /// True if no prior state existed.
    #[serde(default)]
    pub new: bool,
    /// True if operation, signature or version changed.
    #[serde(default)]
    pub modified: bool,
    /// Version of the previously stored state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_version: Option<String>,
    /// When the state was saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Output captured from a tolerated failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Error output captured from a tolerated failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

/// Builds the storage key for a resource.
#[must_use]
pub fn state_key(env: &str, identifier: &str) -> String {
    format!("{env}-{identifier}")
}

impl DeploymentState {
    /// Evaluates a candidate deployment against the previously stored state.
    #[must_use]
    pub fn evaluate(query: &StateQuery<'_>, signature: String, prior: Option<&Self>) -> Self {
        let modified = prior.is_none_or(|p| {
            p.operation != query.operation
                || !SignatureHasher::hashes_match(&p.signature, &signature)
                || p.version != query.version
        });

        Self {
            key: state_key(query.env, query.identifier),
            env: query.env.to_string(),
            identifier: query.identifier.to_string(),
            operation: query.operation,
            version: query.version.to_string(),
            signature,
            origin: query.origin.to_string(),
            new: prior.is_none(),
            modified,
            last_version: prior.map(|p| p.version.clone()),
            timestamp: prior.and_then(|p| p.timestamp),
            stdout: None,
            stderr: None,
        }
    }

    /// Records output captured from a tolerated failure.
    pub fn capture_output(&mut self, stdout: &str, stderr: &str) {
        self.stdout = Some(stdout.to_string());
        self.stderr = Some(stderr.to_string());
    }
}
