//! Deployment state store.
//!
//! Decides whether a candidate deployment differs from what was last
//! deployed, and persists the new state once a deployment went through.

use chrono::Utc;
use tracing::{debug, info};

use crate::config::SignatureHasher;
use crate::error::{HerdError, Result, StateError};

use super::backend::StateBackend;
use super::types::{state_key, DeploymentState, Descriptor, StateQuery};

/// Content-addressed store of per-resource deployment state.
pub struct DeploymentStateStore {
    backend: Box<dyn StateBackend>,
    hasher: SignatureHasher,
}

impl std::fmt::Debug for DeploymentStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentStateStore")
            .field("backend", &self.backend.backend_type())
            .finish()
    }
}

impl DeploymentStateStore {
    /// Creates a store on top of a storage backend.
    #[must_use]
    pub fn new(backend: Box<dyn StateBackend>) -> Self {
        Self {
            backend,
            hasher: SignatureHasher::new(),
        }
    }

    /// Gets the backend type name.
    #[must_use]
    pub fn backend_type(&self) -> &'static str {
        self.backend.backend_type()
    }

    /// Connects the underlying backend.
    ///
    /// # Errors
    ///
    /// Returns the backend error if it cannot be reached.
    pub async fn connect(&self) -> Result<()> {
        self.backend.connect().await
    }

    /// Disconnects the underlying backend.
    ///
    /// # Errors
    ///
    /// Returns the backend error if it fails to release resources.
    pub async fn disconnect(&self) -> Result<()> {
        self.backend.disconnect().await
    }

    /// Disconnects once `result` is known.
    ///
    /// An error in `result` takes precedence over a disconnect failure.
    ///
    /// # Errors
    ///
    /// Returns the error of `result`, or else the disconnect error.
    pub async fn disconnect_after<T>(&self, result: Result<T>) -> Result<T> {
        let disconnected = self.disconnect().await;
        let value = result?;
        disconnected?;
        Ok(value)
    }

    /// Computes the state of a candidate deployment.
    ///
    /// The signature covers the operation and the descriptor. The result is
    /// compared against the state stored under `{env}-{identifier}`; nothing
    /// is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend lookup fails, the stored state cannot
    /// be decoded, or a directory descriptor cannot be read.
    pub async fn get_deployment_state(&self, query: &StateQuery<'_>) -> Result<DeploymentState> {
        let operation = query.operation.as_str();
        let signature = match query.descriptor {
            Descriptor::Text(text) => self.hasher.signature(operation, text),
            Descriptor::Directory(dir) => self.hasher.directory_signature(operation, dir).await?,
        };

        let prior = self.get_stored_state(query.env, query.identifier).await?;
        let state = DeploymentState::evaluate(query, signature, prior.as_ref());

        debug!(
            "State of {} in {}: new={} modified={} signature={}",
            query.identifier,
            query.env,
            state.new,
            state.modified,
            self.hasher.short_hash(&state.signature)
        );

        Ok(state)
    }

    /// Persists a deployment state if it was modified.
    ///
    /// Unmodified states are returned as-is without touching the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be serialized or written.
    pub async fn save_deployment_state(&self, state: DeploymentState) -> Result<DeploymentState> {
        if !state.modified {
            debug!("State of {} unchanged, not saving", state.key);
            return Ok(state);
        }

        let mut state = state;
        state.timestamp = Some(Utc::now());

        let value = serde_json::to_value(&state).map_err(|e| {
            HerdError::State(StateError::serialization(format!(
                "Failed to serialize state of {}: {e}",
                state.key
            )))
        })?;

        let stored = self.backend.set(&state.key, value).await?;
        info!("Saved deployment state {}", stored.key);

        decode(&stored.key, stored.value)
    }

    /// Gets the stored state of a resource, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend lookup fails or the entry is corrupted.
    pub async fn get_stored_state(
        &self,
        env: &str,
        identifier: &str,
    ) -> Result<Option<DeploymentState>> {
        let key = state_key(env, identifier);
        match self.backend.get(&key).await? {
            Some(entry) => decode(&entry.key, entry.value).map(Some),
            None => Ok(None),
        }
    }
}

fn decode(key: &str, value: serde_json::Value) -> Result<DeploymentState> {
    serde_json::from_value(value).map_err(|e| {
        HerdError::State(StateError::Corrupted {
            message: format!("Stored state {key} is not a deployment state: {e}"),
        })
    })
}
