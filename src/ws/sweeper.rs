use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::close::CloseReason;
use super::registry::SessionRegistry;
use crate::db::dbsession::DbSession;

/// Periodically evicts idle or expired sessions along with their durable state
pub struct ExpirySweeper {
    registry: Arc<SessionRegistry>,
    db: DbSession,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(registry: Arc<SessionRegistry>, db: DbSession, interval: Duration) -> Self {
        Self { registry, db, interval }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.run_once(Instant::now()).await;
            }
        })
    }

    /// One sweep pass; returns how many live sessions were evicted
    pub async fn run_once(&self, now: Instant) -> usize {
        let stale = self.registry.sweep(now);
        let mut evicted = 0;
        for session in stale {
            self.registry.teardown(&session, CloseReason::SessionEnded).await;
            // Relay task has exited, nothing can write the snapshot back
            match self.db.delete_session(session.id()).await {
                Ok(()) => evicted += 1,
                Err(e) => error!("Failed to delete durable state of session {}: {}", session.id(), e),
            }
        }
        match self.db.store().purge_expired().await {
            Ok(purged) if purged > 0 => debug!("Sweep purged {} expired keys", purged),
            Ok(_) => {}
            Err(e) => error!("Failed to purge expired keys: {}", e),
        }
        if evicted > 0 {
            info!("Sweep evicted {} sessions", evicted);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memstore::MemoryStore;
    use crate::models::ids::generate_session_id;
    use crate::models::SessionMetadata;
    use crate::replica::fake::{self, SetReplicaFactory};
    use crate::ws::connection::ConnectionHandler;
    use crate::ws::presence::ParticipantInfo;
    use crate::ws::registry::RegistrySettings;
    use crate::ws::session::Outbound;
    use chrono::Utc;
    use std::collections::BTreeSet;
    use tokio::sync::mpsc;

    fn setup(idle_ttl: Duration) -> (Arc<SessionRegistry>, ConnectionHandler, DbSession) {
        let db = DbSession::new(Arc::new(MemoryStore::new()), "test");
        let registry = Arc::new(SessionRegistry::new(
            db.clone(),
            Arc::new(SetReplicaFactory::default()),
            RegistrySettings {
                grace_period: Duration::from_secs(30),
                idle_ttl,
                max_participants: 4,
            },
        ));
        let handler = ConnectionHandler::new(registry.clone(), db.clone());
        (registry, handler, db)
    }

    async fn create_session(db: &DbSession) -> String {
        let now = Utc::now();
        let metadata = SessionMetadata {
            session_id: generate_session_id(),
            note_id: "abc".to_string(),
            host_id: "host".to_string(),
            participants: BTreeSet::new(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(1200),
        };
        db.save_metadata(&metadata, Duration::from_secs(1200)).await.unwrap();
        metadata.session_id
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_is_fully_evicted() {
        let (registry, handler, db) = setup(Duration::from_secs(1));
        let sid = create_session(&db).await;
        db.save_snapshot(&sid, fake::encode(&["x"]), Duration::from_secs(1200))
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handler.accept(&sid, ParticipantInfo::new("a"), tx.clone()).await.unwrap();
        handler.accept(&sid, ParticipantInfo::new("b"), tx).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        let sweeper = ExpirySweeper::new(registry.clone(), db.clone(), Duration::from_secs(60));
        assert_eq!(sweeper.run_once(Instant::now()).await, 1);

        assert!(registry.get(&sid).await.is_none());
        assert!(db.load_metadata(&sid).await.unwrap().is_none());
        assert!(db.load_snapshot(&sid).await.unwrap().is_none());
        assert!(db.list_presence(&sid).await.unwrap().is_empty());

        let mut closes = 0;
        while let Ok(outbound) = rx.try_recv() {
            if outbound == Outbound::Close(CloseReason::SessionEnded) {
                closes += 1;
            }
        }
        assert_eq!(closes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn active_sessions_survive_a_sweep() {
        let (registry, handler, db) = setup(Duration::from_secs(10));
        let sid = create_session(&db).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        handler.accept(&sid, ParticipantInfo::new("a"), tx).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        let sweeper = ExpirySweeper::new(registry.clone(), db.clone(), Duration::from_secs(60));
        assert_eq!(sweeper.run_once(Instant::now()).await, 0);
        assert!(registry.get(&sid).await.is_some());
        assert!(db.load_metadata(&sid).await.unwrap().is_some());
    }
}
