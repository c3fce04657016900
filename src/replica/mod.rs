//! The mergeable document behind a session.
//!
//! The relay never looks inside updates. It only needs to apply them, encode
//! the current state, encode the delta since a version, and hear about every
//! change the replica produces. Produced changes arrive as [`ReplicaUpdate`]s
//! on the channel handed to [`ReplicaFactory::create`].

pub mod lorodoc;
#[cfg(test)]
pub mod fake;

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub use lorodoc::LoroReplicaFactory;

/// Identifies an attached socket within the process
pub type ConnectionId = u64;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("failed to apply update: {0}")]
    Apply(String),
    #[error("failed to encode replica: {0}")]
    Encode(String),
    #[error("invalid state vector: {0}")]
    StateVector(String),
}

/// Where a change to the replica came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// Applied on behalf of an attached connection
    Connection(ConnectionId),
    /// Edited directly on this process
    Local,
}

/// A change the replica produced, encoded as an update other replicas can apply
#[derive(Debug, Clone)]
pub struct ReplicaUpdate {
    pub origin: UpdateOrigin,
    pub update: Vec<u8>,
}

pub trait Replica: Send + Sync {
    /// Merge an encoded update. Re-applying a known update is a no-op and produces no event.
    fn apply(&self, update: &[u8], origin: UpdateOrigin) -> Result<(), MergeError>;

    /// Full state, suitable both for a new client and for the durable snapshot
    fn encode_state(&self) -> Result<Vec<u8>, MergeError>;

    /// Changes not covered by `since` (an encoded state vector); everything when `None`
    fn encode_update(&self, since: Option<&[u8]>) -> Result<Vec<u8>, MergeError>;

    /// Encoded version of what this replica has seen
    fn state_vector(&self) -> Vec<u8>;
}

pub trait ReplicaFactory: Send + Sync {
    /// Build a replica, rehydrated from `snapshot` when present. Every change it
    /// produces afterwards is sent on `updates`.
    fn create(
        &self,
        snapshot: Option<&[u8]>,
        updates: mpsc::UnboundedSender<ReplicaUpdate>,
    ) -> Result<Arc<dyn Replica>, MergeError>;
}
