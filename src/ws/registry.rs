use chrono::Utc;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::close::CloseReason;
use super::session::LiveSession;
use crate::db::dbsession::DbSession;
use crate::db::store::StoreError;
use crate::models::SessionMetadata;
use crate::replica::{MergeError, ReplicaFactory};

/// Attempts to attach to a session that keeps getting torn down under us
const MAX_CREATE_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Replica(#[from] MergeError),
    #[error("session initialisation failed: {0}")]
    Init(Arc<RegistryError>),
    #[error("session {0} was torn down while attaching")]
    TornDown(String),
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub grace_period: Duration,
    pub idle_ttl: Duration,
    pub max_participants: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub sessions: usize,
    pub connections: usize,
    pub participants: usize,
}

/// Process-local map of live sessions.
///
/// Entries are never evicted by the cache itself; every removal goes through
/// [`SessionRegistry::teardown`] or the grace timer so sockets get a close reason
/// and the relay task is stopped.
pub struct SessionRegistry {
    sessions: Cache<String, Arc<LiveSession>>,
    db: DbSession,
    factory: Arc<dyn ReplicaFactory>,
    settings: RegistrySettings,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new(db: DbSession, factory: Arc<dyn ReplicaFactory>, settings: RegistrySettings) -> Self {
        Self {
            sessions: Cache::builder().build(),
            db,
            factory,
            settings,
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<LiveSession>> {
        self.sessions.get(session_id).await
    }

    /// Return the live session or build it, rehydrating from the stored snapshot.
    ///
    /// Concurrent first accesses share a single initialisation, so one replica is
    /// constructed per incarnation.
    pub async fn get_or_create(&self, metadata: &SessionMetadata) -> Result<Arc<LiveSession>, RegistryError> {
        let session_id = &metadata.session_id;
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let session = self
                .sessions
                .try_get_with(session_id.clone(), self.start_session(metadata.clone()))
                .await
                .map_err(RegistryError::Init)?;
            if !session.is_closed() {
                return Ok(session);
            }
            // Closed but not yet dropped from the cache
            debug!("Session {} is being torn down, retrying", session_id);
            self.remove_entry(&session).await;
        }
        Err(RegistryError::TornDown(session_id.clone()))
    }

    async fn start_session(&self, metadata: SessionMetadata) -> Result<Arc<LiveSession>, RegistryError> {
        let snapshot = self.db.load_snapshot(&metadata.session_id).await?;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        info!(
            "Starting session {} (generation {}, {})",
            metadata.session_id,
            generation,
            if snapshot.is_some() { "from snapshot" } else { "empty" }
        );
        let session = LiveSession::start(
            metadata,
            generation,
            snapshot.as_deref(),
            self.factory.as_ref(),
            self.db.clone(),
        )?;
        Ok(session)
    }

    /// Drop the cache entry only if it still holds this incarnation
    async fn remove_entry(&self, session: &LiveSession) -> bool {
        let generation = session.generation();
        let result = self
            .sessions
            .entry(session.id().to_string())
            .and_compute_with(|entry| {
                let op = match entry {
                    Some(entry) if entry.value().generation() == generation => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
        matches!(result, CompResult::Removed(_))
    }

    /// Close every socket of the session, drop it from the registry and wait for its
    /// relay task. No snapshot write for this incarnation happens after this returns.
    pub async fn teardown(&self, session: &LiveSession, reason: CloseReason) -> bool {
        let closed = session.close(reason);
        self.remove_entry(session).await;
        session.stopped().await;
        if closed {
            info!(
                "Session {} (generation {}) torn down: {}",
                session.id(),
                session.generation(),
                reason
            );
        }
        closed
    }

    pub async fn remove(&self, session_id: &str, reason: CloseReason) -> Option<Arc<LiveSession>> {
        let session = self.sessions.get(session_id).await?;
        self.teardown(&session, reason).await;
        Some(session)
    }

    /// Tear the session down and delete all of its durable state.
    /// Returns whether a live session existed on this process.
    pub async fn end(&self, session_id: &str) -> Result<bool, RegistryError> {
        let was_live = self.remove(session_id, CloseReason::SessionEnded).await.is_some();
        self.db.delete_session(session_id).await?;
        Ok(was_live)
    }

    /// Grace timer expiry: tear down the given incarnation if nobody came back
    pub async fn evict_if_idle(&self, session_id: &str, generation: u64) -> bool {
        let Some(session) = self.sessions.get(session_id).await else {
            return false;
        };
        if session.generation() != generation || !session.close_if_idle() {
            return false;
        }
        self.remove_entry(&session).await;
        session.stopped().await;
        info!(
            "Session {} (generation {}) evicted after grace period",
            session_id, generation
        );
        true
    }

    pub fn start_grace_timer(self: &Arc<Self>, session: &LiveSession) {
        let registry = Arc::clone(self);
        let session_id = session.id().to_string();
        let generation = session.generation();
        let grace_period = self.settings.grace_period;
        debug!(
            "Session {} is empty, tearing down in {:?} unless someone rejoins",
            session_id, grace_period
        );
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            registry.evict_if_idle(&session_id, generation).await;
        });
        session.set_grace_timer(timer);
    }

    /// Live sessions idle past the idle window or past their expiry
    pub fn sweep(&self, now: Instant) -> Vec<Arc<LiveSession>> {
        let wall_now = Utc::now();
        self.sessions
            .iter()
            .map(|(_, session)| session)
            .filter(|session| {
                session.idle_for(now) > self.settings.idle_ttl || session.metadata().is_expired_at(wall_now)
            })
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        self.sessions
            .iter()
            .fold(RegistryStats::default(), |mut stats, (_, session)| {
                stats.sessions += 1;
                stats.connections += session.connection_count();
                stats.participants += session.participant_count();
                stats
            })
    }

    /// Close every live session. Durable state is left to its TTL.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<LiveSession>> = self.sessions.iter().map(|(_, s)| s).collect();
        if sessions.is_empty() {
            return;
        }
        warn!("Closing {} live sessions", sessions.len());
        for session in sessions {
            self.teardown(&session, CloseReason::SessionEnded).await;
        }
    }
}
