use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::store::{SessionStore, StoreError};
use crate::models::{ParticipantPresence, SessionMetadata};

/// Typed access to the session key namespace:
///
/// * `{prefix}:session:{id}` session metadata (JSON)
/// * `{prefix}:snapshot:{id}` encoded replica state (binary)
/// * `{prefix}:presence:{id}:{participant}` participant presence (JSON)
#[derive(Clone)]
pub struct DbSession {
    store: Arc<dyn SessionStore>,
    prefix: Arc<str>,
}

impl DbSession {
    pub fn new(store: Arc<dyn SessionStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: Arc::from(prefix),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Round-trip to the store; used by the readiness check
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.get(&format!("{}:ping", self.prefix)).await.map(|_| ())
    }

    pub fn metadata_key(&self, session_id: &str) -> String {
        format!("{}:session:{}", self.prefix, session_id)
    }

    pub fn snapshot_key(&self, session_id: &str) -> String {
        format!("{}:snapshot:{}", self.prefix, session_id)
    }

    pub fn presence_prefix(&self, session_id: &str) -> String {
        format!("{}:presence:{}:", self.prefix, session_id)
    }

    pub fn presence_key(&self, session_id: &str, participant_id: &str) -> String {
        format!("{}{}", self.presence_prefix(session_id), participant_id)
    }

    pub async fn load_metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>, StoreError> {
        self.get_json(&self.metadata_key(session_id)).await
    }

    pub async fn save_metadata(&self, metadata: &SessionMetadata, ttl: Duration) -> Result<(), StoreError> {
        self.set_json(&self.metadata_key(&metadata.session_id), metadata, ttl).await
    }

    pub async fn load_snapshot(&self, session_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.store.get(&self.snapshot_key(session_id)).await
    }

    pub async fn save_snapshot(&self, session_id: &str, snapshot: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        self.store.set(&self.snapshot_key(session_id), snapshot, ttl).await
    }

    pub async fn save_presence(
        &self,
        session_id: &str,
        presence: &ParticipantPresence,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let key = self.presence_key(session_id, &presence.participant_id);
        self.set_json(&key, presence, ttl).await
    }

    pub async fn load_presence(
        &self,
        session_id: &str,
        participant_id: &str,
    ) -> Result<Option<ParticipantPresence>, StoreError> {
        self.get_json(&self.presence_key(session_id, participant_id)).await
    }

    pub async fn delete_presence(&self, session_id: &str, participant_id: &str) -> Result<(), StoreError> {
        self.store.delete(&self.presence_key(session_id, participant_id)).await
    }

    /// Presence records currently stored for a session, skipping corrupt ones
    pub async fn list_presence(&self, session_id: &str) -> Result<Vec<ParticipantPresence>, StoreError> {
        let keys = self.store.keys_with_prefix(&self.presence_prefix(session_id)).await?;
        let mut participants = Vec::with_capacity(keys.len());
        for key in keys {
            match self.get_json::<ParticipantPresence>(&key).await {
                Ok(Some(presence)) => participants.push(presence),
                // Expired between the scan and the read
                Ok(None) => {}
                Err(e) => warn!("Skipping presence record: {}", e),
            }
        }
        Ok(participants)
    }

    /// Delete metadata, snapshot and every presence key of a session
    pub async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let presence_keys = self.store.keys_with_prefix(&self.presence_prefix(session_id)).await?;
        for key in &presence_keys {
            self.store.delete(key).await?;
        }
        self.store.delete(&self.snapshot_key(session_id)).await?;
        self.store.delete(&self.metadata_key(session_id)).await?;
        info!(
            "Deleted durable state of session {} ({} presence keys)",
            session_id,
            presence_keys.len()
        );
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Decode {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.store.set(key, bytes, ttl).await
    }
}
