use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::close::CloseReason;
use super::presence::{ParticipantInfo, PresenceTracker};
use super::registry::SessionRegistry;
use super::session::{AttachError, LiveSession, Outbound};
use crate::db::dbsession::DbSession;
use crate::models::ids::is_valid_session_id;
use crate::replica::ConnectionId;

const MAX_ATTACH_ATTEMPTS: usize = 3;

/// A socket that made it into a session
pub struct AttachedConnection {
    pub id: ConnectionId,
    pub session: Arc<LiveSession>,
    pub participant_id: String,
}

/// Accept, relay and release logic shared by every websocket
pub struct ConnectionHandler {
    registry: Arc<SessionRegistry>,
    db: DbSession,
    presence: PresenceTracker,
    next_id: AtomicU64,
}

impl ConnectionHandler {
    pub fn new(registry: Arc<SessionRegistry>, db: DbSession) -> Self {
        Self {
            registry,
            presence: PresenceTracker::new(db.clone()),
            db,
            next_id: AtomicU64::new(1),
        }
    }

    /// Validate the session, attach the socket and publish its presence.
    ///
    /// On success the full replica state is already queued on `outbound`. On error the
    /// caller closes the socket with the returned reason; nothing stays attached.
    pub async fn accept(
        &self,
        session_id: &str,
        participant: ParticipantInfo,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Result<AttachedConnection, CloseReason> {
        if !is_valid_session_id(session_id) {
            debug!("Rejecting malformed session id {:?}", session_id);
            return Err(CloseReason::InvalidSessionId);
        }

        let metadata = match self.db.load_metadata(session_id).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => return Err(CloseReason::NotFound),
            Err(e) => {
                error!("Failed to load session {}: {}", session_id, e);
                return Err(CloseReason::InternalError);
            }
        };

        if metadata.is_expired_at(Utc::now()) {
            info!("Session {} has expired, removing it", session_id);
            self.registry.remove(session_id, CloseReason::Expired).await;
            if let Err(e) = self.db.delete_session(session_id).await {
                warn!("Failed to delete expired session {}: {}", session_id, e);
            }
            return Err(CloseReason::Expired);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let max_participants = self.registry.settings().max_participants;
        let mut attached = None;
        for _ in 0..MAX_ATTACH_ATTEMPTS {
            let session = self.registry.get_or_create(&metadata).await.map_err(|e| {
                error!("Failed to open session {}: {}", session_id, e);
                CloseReason::InternalError
            })?;
            match session.attach(id, &participant.id, outbound.clone(), max_participants) {
                Ok(()) => {
                    attached = Some(session);
                    break;
                }
                Err(AttachError::Closed) => continue,
                Err(AttachError::Full) => {
                    info!(
                        "Session {} is full, rejecting participant {}",
                        session_id, participant.id
                    );
                    return Err(CloseReason::SessionFull);
                }
                Err(AttachError::Encode(e)) => {
                    error!("Failed to encode state of session {}: {}", session_id, e);
                    return Err(CloseReason::InternalError);
                }
            }
        }
        let Some(session) = attached else {
            error!("Session {} kept closing while attaching", session_id);
            return Err(CloseReason::InternalError);
        };

        let connection = AttachedConnection {
            id,
            session,
            participant_id: participant.id.clone(),
        };

        if let Err(e) = self.presence.join(connection.session.metadata(), &participant).await {
            error!(
                "Failed to write presence of {} in session {}: {}",
                participant.id, session_id, e
            );
            self.on_close(&connection).await;
            return Err(CloseReason::InternalError);
        }
        if !connection.session.has_participant(&connection.participant_id) {
            // Torn down during the write; its durable deletion may already have run
            debug!(
                "Session {} closed while {} was joining, dropping presence",
                session_id, connection.participant_id
            );
            if let Err(e) = self.presence.leave(session_id, &connection.participant_id).await {
                warn!(
                    "Failed to delete presence of {} in session {}: {}",
                    connection.participant_id, session_id, e
                );
            }
        }

        info!(
            "Participant {} attached to session {} (connection {}, {} open)",
            connection.participant_id,
            session_id,
            id,
            connection.session.connection_count()
        );
        Ok(connection)
    }

    /// Queue a text frame for the session's relay. False once the session is closed.
    pub fn on_frame(&self, connection: &AttachedConnection, text: String) -> bool {
        connection.session.touch();
        connection.session.submit(connection.id, text)
    }

    /// Release a socket that closed or errored
    pub async fn on_close(&self, connection: &AttachedConnection) {
        let session = &connection.session;
        let Some(detached) = session.detach(connection.id) else {
            // Already dropped by a teardown
            return;
        };
        info!(
            "Participant {} left session {} (connection {})",
            detached.participant_id,
            session.id(),
            connection.id
        );

        if !detached.participant_still_connected {
            if let Err(e) = self.presence.leave(session.id(), &detached.participant_id).await {
                warn!(
                    "Failed to delete presence of {} in session {}: {}",
                    detached.participant_id,
                    session.id(),
                    e
                );
            }
        }
        if detached.now_empty {
            self.registry.start_grace_timer(session);
        }
    }
}
