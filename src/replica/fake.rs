//! Set-union replica for relay tests. Updates are JSON string arrays; merging is
//! set union, so it is commutative and idempotent like a real CRDT.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::{MergeError, Replica, ReplicaFactory, ReplicaUpdate, UpdateOrigin};

pub fn encode(items: &[&str]) -> Vec<u8> {
    serde_json::to_vec(items).unwrap()
}

pub fn decode(bytes: &[u8]) -> BTreeSet<String> {
    serde_json::from_slice(bytes).unwrap()
}

pub struct SetReplica {
    items: Mutex<BTreeSet<String>>,
    updates: mpsc::UnboundedSender<ReplicaUpdate>,
}

impl SetReplica {
    pub fn items(&self) -> BTreeSet<String> {
        self.items.lock().unwrap().clone()
    }

    fn parse(bytes: &[u8]) -> Result<BTreeSet<String>, MergeError> {
        serde_json::from_slice(bytes).map_err(|e| MergeError::Apply(e.to_string()))
    }
}

impl Replica for SetReplica {
    fn apply(&self, update: &[u8], origin: UpdateOrigin) -> Result<(), MergeError> {
        let incoming = Self::parse(update)?;
        let fresh: Vec<String> = {
            let mut items = self.items.lock().unwrap();
            incoming.into_iter().filter(|item| items.insert(item.clone())).collect()
        };
        if !fresh.is_empty() {
            let update = serde_json::to_vec(&fresh).unwrap();
            let _ = self.updates.send(ReplicaUpdate { origin, update });
        }
        Ok(())
    }

    fn encode_state(&self) -> Result<Vec<u8>, MergeError> {
        Ok(serde_json::to_vec(&self.items()).unwrap())
    }

    fn encode_update(&self, since: Option<&[u8]>) -> Result<Vec<u8>, MergeError> {
        let known = match since {
            Some(bytes) => Self::parse(bytes).map_err(|e| MergeError::StateVector(e.to_string()))?,
            None => BTreeSet::new(),
        };
        let missing: Vec<String> = self.items().difference(&known).cloned().collect();
        Ok(serde_json::to_vec(&missing).unwrap())
    }

    fn state_vector(&self) -> Vec<u8> {
        serde_json::to_vec(&self.items()).unwrap()
    }
}

/// Counts constructions so tests can check create-once semantics
#[derive(Default)]
pub struct SetReplicaFactory {
    created: AtomicUsize,
    replicas: Mutex<Vec<Arc<SetReplica>>>,
}

impl SetReplicaFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Arc<SetReplica> {
        self.replicas.lock().unwrap().last().cloned().unwrap()
    }
}

impl ReplicaFactory for SetReplicaFactory {
    fn create(
        &self,
        snapshot: Option<&[u8]>,
        updates: mpsc::UnboundedSender<ReplicaUpdate>,
    ) -> Result<Arc<dyn Replica>, MergeError> {
        let items = match snapshot {
            Some(bytes) => SetReplica::parse(bytes)?,
            None => BTreeSet::new(),
        };
        let replica = Arc::new(SetReplica {
            items: Mutex::new(items),
            updates,
        });
        self.created.fetch_add(1, Ordering::SeqCst);
        self.replicas.lock().unwrap().push(replica.clone());
        Ok(replica)
    }
}
