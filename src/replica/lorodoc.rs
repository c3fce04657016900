use loro::{ExportMode, LoroDoc, VersionVector};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::{MergeError, Replica, ReplicaFactory, ReplicaUpdate, UpdateOrigin};

/// A replica backed by a Loro document.
pub struct LoroReplica {
    doc: LoroDoc,
    updates: mpsc::UnboundedSender<ReplicaUpdate>,
}

impl LoroReplica {
    pub fn new(
        snapshot: Option<&[u8]>,
        updates: mpsc::UnboundedSender<ReplicaUpdate>,
    ) -> Result<Self, MergeError> {
        let doc = LoroDoc::new();
        if let Some(snapshot) = snapshot {
            doc.import(snapshot)
                .map_err(|e| MergeError::Apply(format!("snapshot: {}", e)))?;
        }

        // Commits made directly on this doc; imports never reach this callback
        let local_updates = updates.clone();
        doc.subscribe_local_update(Box::new(move |update: &Vec<u8>| {
            local_updates
                .send(ReplicaUpdate {
                    origin: UpdateOrigin::Local,
                    update: update.clone(),
                })
                .is_ok()
        }))
        .detach();

        Ok(Self { doc, updates })
    }

    /// The underlying document, for direct local edits
    pub fn doc(&self) -> &LoroDoc {
        &self.doc
    }
}

impl Replica for LoroReplica {
    fn apply(&self, update: &[u8], origin: UpdateOrigin) -> Result<(), MergeError> {
        let before = self.doc.oplog_vv();
        self.doc
            .import(update)
            .map_err(|e| MergeError::Apply(e.to_string()))?;
        let after = self.doc.oplog_vv();

        // Known or still-pending changes leave the version untouched
        if after == before {
            debug!("Update of {} bytes changed nothing", update.len());
            return Ok(());
        }

        let delta = self
            .doc
            .export(ExportMode::updates(&before))
            .map_err(|e| MergeError::Encode(e.to_string()))?;
        // The relay task owns the receiver; it is gone only during teardown
        let _ = self.updates.send(ReplicaUpdate { origin, update: delta });
        Ok(())
    }

    fn encode_state(&self) -> Result<Vec<u8>, MergeError> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| MergeError::Encode(e.to_string()))
    }

    fn encode_update(&self, since: Option<&[u8]>) -> Result<Vec<u8>, MergeError> {
        let mode_result = match since {
            Some(bytes) => {
                let vv = VersionVector::decode(bytes)
                    .map_err(|e| MergeError::StateVector(e.to_string()))?;
                self.doc.export(ExportMode::updates(&vv))
            }
            None => self.doc.export(ExportMode::all_updates()),
        };
        mode_result.map_err(|e| MergeError::Encode(e.to_string()))
    }

    fn state_vector(&self) -> Vec<u8> {
        self.doc.oplog_vv().encode()
    }
}

/// Builds [`LoroReplica`]s for the session registry
#[derive(Default)]
pub struct LoroReplicaFactory;

impl ReplicaFactory for LoroReplicaFactory {
    fn create(
        &self,
        snapshot: Option<&[u8]>,
        updates: mpsc::UnboundedSender<ReplicaUpdate>,
    ) -> Result<Arc<dyn Replica>, MergeError> {
        Ok(Arc::new(LoroReplica::new(snapshot, updates)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TEXT: &str = "content";

    /// A client-side doc producing one update per inserted chunk
    fn edits(peer: u64, chunks: &[String]) -> Vec<Vec<u8>> {
        let doc = LoroDoc::new();
        doc.set_peer_id(peer).unwrap();
        let text = doc.get_text(TEXT);
        let mut updates = Vec::new();
        for chunk in chunks {
            let before = doc.oplog_vv();
            text.insert(text.len_unicode(), chunk).unwrap();
            doc.commit();
            updates.push(doc.export(ExportMode::updates(&before)).unwrap());
        }
        updates
    }

    fn replica() -> (LoroReplica, mpsc::UnboundedReceiver<ReplicaUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LoroReplica::new(None, tx).unwrap(), rx)
    }

    fn content(replica: &LoroReplica) -> String {
        replica.doc().get_text(TEXT).to_string()
    }

    #[test]
    fn applying_an_update_twice_equals_applying_it_once() {
        let (replica, mut rx) = replica();
        let update = edits(1, &["X".to_string()]).remove(0);

        replica.apply(&update, UpdateOrigin::Connection(1)).unwrap();
        let once = replica.doc().oplog_vv();
        replica.apply(&update, UpdateOrigin::Connection(1)).unwrap();

        assert_eq!(content(&replica), "X");
        assert_eq!(replica.doc().oplog_vv(), once);
        // Only the first application produced an event
        let event = rx.try_recv().unwrap();
        assert_eq!(event.origin, UpdateOrigin::Connection(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn produced_update_rebuilds_the_change_elsewhere() {
        let (server, mut rx) = replica();
        server
            .apply(&edits(7, &["hello".to_string()])[0], UpdateOrigin::Connection(3))
            .unwrap();
        let produced = rx.try_recv().unwrap();

        let (other, _rx) = replica();
        other.apply(&produced.update, UpdateOrigin::Connection(9)).unwrap();
        assert_eq!(content(&other), "hello");
    }

    #[test]
    fn local_edits_are_reported_as_local() {
        let (replica, mut rx) = replica();
        replica.doc().get_text(TEXT).insert(0, "srv").unwrap();
        replica.doc().commit();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.origin, UpdateOrigin::Local);
    }

    #[test]
    fn snapshot_rehydrates_content() {
        let (first, _rx) = replica();
        first
            .apply(&edits(1, &["persisted".to_string()])[0], UpdateOrigin::Local)
            .unwrap();
        let snapshot = first.encode_state().unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let second = LoroReplica::new(Some(&snapshot), tx).unwrap();
        assert_eq!(content(&second), "persisted");
    }

    #[test]
    fn corrupt_snapshot_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(LoroReplica::new(Some(b"garbage"), tx).is_err());
    }

    #[test]
    fn encode_update_since_a_state_vector_fills_the_gap() {
        let (server, _rx) = replica();
        let updates = edits(1, &["a".to_string(), "b".to_string()]);
        server.apply(&updates[0], UpdateOrigin::Local).unwrap();

        let (client, _crx) = replica();
        client.apply(&updates[0], UpdateOrigin::Local).unwrap();
        let client_sv = client.state_vector();

        server.apply(&updates[1], UpdateOrigin::Local).unwrap();
        let gap = server.encode_update(Some(&client_sv)).unwrap();
        client.apply(&gap, UpdateOrigin::Local).unwrap();
        assert_eq!(content(&client), "ab");
    }

    proptest! {
        #[test]
        fn any_interleaving_converges(
            a_chunks in prop::collection::vec("[a-z]{1,4}", 1..5),
            b_chunks in prop::collection::vec("[A-Z]{1,4}", 1..5),
            order in prop::collection::vec(any::<bool>(), 0..10),
        ) {
            let a = edits(1, &a_chunks);
            let b = edits(2, &b_chunks);

            // Sequential reference
            let (reference, _r) = replica();
            for update in a.iter().chain(b.iter()) {
                reference.apply(update, UpdateOrigin::Local).unwrap();
            }

            // Random interleaving preserving each participant's own order
            let (mixed, _m) = replica();
            let (mut ia, mut ib) = (0, 0);
            let mut picks = order.into_iter();
            while ia < a.len() || ib < b.len() {
                let take_a = ib >= b.len() || (ia < a.len() && picks.next().unwrap_or(true));
                if take_a {
                    mixed.apply(&a[ia], UpdateOrigin::Local).unwrap();
                    ia += 1;
                } else {
                    mixed.apply(&b[ib], UpdateOrigin::Local).unwrap();
                    ib += 1;
                }
            }

            // Reversed participant order, with duplicates
            let (reversed, _v) = replica();
            for update in b.iter().chain(a.iter()).chain(b.iter()) {
                reversed.apply(update, UpdateOrigin::Local).unwrap();
            }

            let expected = content(&reference);
            prop_assert_eq!(content(&mixed), expected.clone());
            prop_assert_eq!(content(&reversed), expected);
        }
    }
}
