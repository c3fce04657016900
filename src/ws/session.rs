use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use super::close::CloseReason;
use super::relay;
use crate::db::dbsession::DbSession;
use crate::models::{SendMessage, SessionMetadata, SyncPayload};
use crate::replica::{ConnectionId, MergeError, Replica, ReplicaFactory};

/// What the relay hands to a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(String),
    Close(CloseReason),
}

/// A client frame queued for the session's relay task
#[derive(Debug)]
pub struct Inbound {
    pub from: ConnectionId,
    pub text: String,
}

#[derive(Debug)]
pub enum AttachError {
    /// The session was torn down while the caller was looking it up
    Closed,
    Full,
    Encode(MergeError),
}

struct Connection {
    participant_id: String,
    outbound: mpsc::UnboundedSender<Outbound>,
}

struct SessionState {
    connections: HashMap<ConnectionId, Connection>,
    last_activity: Instant,
    grace_timer: Option<JoinHandle<()>>,
}

/// Result of removing a connection
#[derive(Debug, PartialEq, Eq)]
pub struct Detached {
    pub participant_id: String,
    /// Another connection of the same participant is still attached
    pub participant_still_connected: bool,
    pub now_empty: bool,
}

/// In-memory state of one session on this process.
///
/// Connection bookkeeping sits behind a synchronous lock that is never held across
/// an await. The replica is only mutated by the session's relay task.
pub struct LiveSession {
    metadata: SessionMetadata,
    generation: u64,
    replica: Arc<dyn Replica>,
    inbound: mpsc::UnboundedSender<Inbound>,
    closed: watch::Sender<bool>,
    state: Mutex<SessionState>,
    relay_task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveSession {
    /// Build the replica and spawn the relay task for a session
    pub fn start(
        metadata: SessionMetadata,
        generation: u64,
        snapshot: Option<&[u8]>,
        factory: &dyn ReplicaFactory,
        db: DbSession,
    ) -> Result<Arc<Self>, MergeError> {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let replica = factory.create(snapshot, updates_tx)?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);

        let session = Arc::new(Self {
            metadata,
            generation,
            replica,
            inbound: inbound_tx,
            closed,
            state: Mutex::new(SessionState {
                connections: HashMap::new(),
                last_activity: Instant::now(),
                grace_timer: None,
            }),
            relay_task: Mutex::new(None),
        });

        let handle = tokio::spawn(relay::run(session.clone(), db, inbound_rx, updates_rx));
        *lock(&session.relay_task) = Some(handle);
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.metadata.session_id
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn replica(&self) -> &Arc<dyn Replica> {
        &self.replica
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub(crate) fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Attach a connection and queue the full replica state as its first frame.
    ///
    /// The state is encoded under the same lock that inserts the connection, so no
    /// broadcast can reach the new socket ahead of it.
    pub fn attach(
        &self,
        id: ConnectionId,
        participant_id: &str,
        outbound: mpsc::UnboundedSender<Outbound>,
        max_participants: usize,
    ) -> Result<(), AttachError> {
        let mut state = lock(&self.state);
        if self.is_closed() {
            return Err(AttachError::Closed);
        }
        if state.connections.len() >= max_participants {
            return Err(AttachError::Full);
        }

        let full_state = self.replica.encode_state().map_err(AttachError::Encode)?;
        if let Some(text) = encode_frame(&SendMessage::SyncStep2(SyncPayload::update(full_state))) {
            let _ = outbound.send(Outbound::Frame(text));
        }

        state.connections.insert(
            id,
            Connection {
                participant_id: participant_id.to_string(),
                outbound,
            },
        );
        state.last_activity = Instant::now();
        if let Some(timer) = state.grace_timer.take() {
            debug!("Session {} reattached, grace timer cancelled", self.id());
            timer.abort();
        }
        Ok(())
    }

    /// Remove a connection. `None` when it was already gone (e.g. removed by teardown).
    pub fn detach(&self, id: ConnectionId) -> Option<Detached> {
        let mut state = lock(&self.state);
        let connection = state.connections.remove(&id)?;
        state.last_activity = Instant::now();
        let participant_still_connected = state
            .connections
            .values()
            .any(|c| c.participant_id == connection.participant_id);
        Some(Detached {
            participant_id: connection.participant_id,
            participant_still_connected,
            now_empty: state.connections.is_empty(),
        })
    }

    /// Keep a grace timer while the session stays empty; drop it otherwise
    pub fn set_grace_timer(&self, timer: JoinHandle<()>) {
        let mut state = lock(&self.state);
        if state.connections.is_empty() && !self.is_closed() {
            if let Some(previous) = state.grace_timer.replace(timer) {
                previous.abort();
            }
        } else {
            timer.abort();
        }
    }

    pub fn has_grace_timer(&self) -> bool {
        lock(&self.state).grace_timer.is_some()
    }

    pub fn touch(&self) {
        lock(&self.state).last_activity = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(lock(&self.state).last_activity)
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.state).connections.len()
    }

    /// Distinct participants across all attached connections
    pub fn participant_count(&self) -> usize {
        let state = lock(&self.state);
        let mut ids: Vec<&str> = state
            .connections
            .values()
            .map(|c| c.participant_id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// True while any connection of the participant is attached. Closing detaches everyone.
    pub fn has_participant(&self, participant_id: &str) -> bool {
        lock(&self.state)
            .connections
            .values()
            .any(|c| c.participant_id == participant_id)
    }

    pub fn participant_of(&self, id: ConnectionId) -> Option<String> {
        lock(&self.state)
            .connections
            .get(&id)
            .map(|c| c.participant_id.clone())
    }

    /// Queue a client frame for the relay task. False once the session is closed.
    pub fn submit(&self, from: ConnectionId, text: String) -> bool {
        !self.is_closed() && self.inbound.send(Inbound { from, text }).is_ok()
    }

    /// Send a frame to every open connection except `exclude`; returns how many were reached
    pub fn broadcast(&self, text: &str, exclude: Option<ConnectionId>) -> usize {
        let state = lock(&self.state);
        let mut reached = 0;
        for (id, connection) in state.connections.iter() {
            if Some(*id) == exclude || connection.outbound.is_closed() {
                continue;
            }
            if connection.outbound.send(Outbound::Frame(text.to_string())).is_ok() {
                reached += 1;
            }
        }
        reached
    }

    pub fn send_to(&self, id: ConnectionId, text: String) -> bool {
        match lock(&self.state).connections.get(&id) {
            Some(connection) => connection.outbound.send(Outbound::Frame(text)).is_ok(),
            None => false,
        }
    }

    /// Close every connection with `reason` and stop accepting new ones.
    /// Only the first caller gets `true`.
    pub fn close(&self, reason: CloseReason) -> bool {
        let mut state = lock(&self.state);
        if self.is_closed() {
            return false;
        }
        self.closed.send_replace(true);
        for (_, connection) in state.connections.drain() {
            let _ = connection.outbound.send(Outbound::Close(reason));
        }
        if let Some(timer) = state.grace_timer.take() {
            timer.abort();
        }
        true
    }

    /// Close only if no connection is attached. Called from the grace timer itself,
    /// so the timer handle is released rather than aborted.
    pub fn close_if_idle(&self) -> bool {
        let mut state = lock(&self.state);
        if self.is_closed() || !state.connections.is_empty() {
            return false;
        }
        self.closed.send_replace(true);
        state.grace_timer.take();
        true
    }

    /// Wait for the relay task to finish its current step and exit.
    /// Must follow `close`; no snapshot write happens after this returns.
    pub async fn stopped(&self) {
        let handle = lock(&self.relay_task).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Relay task of session {} failed: {}", self.id(), e);
                }
            }
        }
    }
}

pub(crate) fn encode_frame(message: &SendMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text),
        Err(e) => {
            error!("Failed to encode outbound frame: {}", e);
            None
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
