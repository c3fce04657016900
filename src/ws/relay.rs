use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::presence::PresenceTracker;
use super::session::{encode_frame, Inbound, LiveSession};
use crate::db::dbsession::DbSession;
use crate::models::{ReceivedMessage, SendMessage, SyncPayload};
use crate::replica::{ConnectionId, ReplicaUpdate, UpdateOrigin};

/// Relay loop of one session.
///
/// Client frames and replica updates are handled one at a time, so the replica sees a
/// single ordered stream of applications and per-connection order is kept. The loop
/// exits between steps once the session is closed; an in-flight snapshot write always
/// finishes before `LiveSession::stopped` returns.
pub async fn run(
    session: Arc<LiveSession>,
    db: DbSession,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    mut updates: mpsc::UnboundedReceiver<ReplicaUpdate>,
) {
    let mut closed = session.closed_signal();
    let presence = PresenceTracker::new(db.clone());
    debug!("Relay started for session {} (generation {})", session.id(), session.generation());

    loop {
        if *closed.borrow() {
            break;
        }
        tokio::select! {
            biased;
            changed = closed.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            Some(update) = updates.recv() => {
                relay_update(&session, update);
                // Fold whatever else is already queued into one snapshot write
                while let Ok(next) = updates.try_recv() {
                    relay_update(&session, next);
                }
                persist_snapshot(&session, &db).await;
            }
            Some(frame) = inbound.recv() => {
                handle_frame(&session, &presence, frame).await;
            }
            else => break,
        }
    }

    debug!("Relay stopped for session {} (generation {})", session.id(), session.generation());
}

async fn handle_frame(session: &LiveSession, presence: &PresenceTracker, frame: Inbound) {
    let message = match serde_json::from_str::<ReceivedMessage>(&frame.text) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                "Dropping malformed frame from connection {} in session {}: {}",
                frame.from,
                session.id(),
                e
            );
            return;
        }
    };

    match message {
        ReceivedMessage::SyncStep1(payload) => {
            apply_update(session, frame.from, &payload.update);
            if let Some(state_vector) = payload.state_vector {
                reply_missing(session, frame.from, &state_vector);
            }
        }
        ReceivedMessage::SyncStep2(payload) | ReceivedMessage::SyncUpdate(payload) => {
            apply_update(session, frame.from, &payload.update);
        }
        ReceivedMessage::Awareness(_) => {
            // Forwarded byte for byte
            session.broadcast(&frame.text, Some(frame.from));
        }
        ReceivedMessage::Presence(payload) => {
            let Some(participant_id) = session.participant_of(frame.from) else {
                return;
            };
            // The participant may leave while the store is awaited
            let attached = || session.has_participant(&participant_id);
            if let Err(e) = presence
                .update(session.metadata(), &participant_id, payload, attached)
                .await
            {
                warn!(
                    "Failed to update presence of {} in session {}: {}",
                    participant_id,
                    session.id(),
                    e
                );
            }
        }
        ReceivedMessage::Unknown => {
            warn!(
                "Ignoring frame of unknown type from connection {} in session {}",
                frame.from,
                session.id()
            );
        }
    }
}

fn apply_update(session: &LiveSession, from: ConnectionId, update: &[u8]) {
    if update.is_empty() {
        return;
    }
    if let Err(e) = session
        .replica()
        .apply(update, UpdateOrigin::Connection(from))
    {
        warn!(
            "Rejected update of {} bytes from connection {} in session {}: {}",
            update.len(),
            from,
            session.id(),
            e
        );
    }
}

fn reply_missing(session: &LiveSession, to: ConnectionId, state_vector: &[u8]) {
    match session.replica().encode_update(Some(state_vector)) {
        Ok(update) => {
            if let Some(text) = encode_frame(&SendMessage::SyncStep2(SyncPayload::update(update))) {
                session.send_to(to, text);
            }
        }
        Err(e) => warn!(
            "Cannot answer sync-step-1 from connection {} in session {}: {}",
            to,
            session.id(),
            e
        ),
    }
}

fn relay_update(session: &LiveSession, update: ReplicaUpdate) {
    let exclude = match update.origin {
        UpdateOrigin::Connection(id) => Some(id),
        UpdateOrigin::Local => None,
    };
    let Some(text) = encode_frame(&SendMessage::SyncUpdate(SyncPayload::update(update.update))) else {
        return;
    };
    let reached = session.broadcast(&text, exclude);
    debug!("Relayed update in session {} to {} connections", session.id(), reached);
}

async fn persist_snapshot(session: &LiveSession, db: &DbSession) {
    // Teardown may be waiting on us; a closed session must not write again
    if session.is_closed() {
        return;
    }
    let Some(ttl) = session.metadata().remaining_lifetime(Utc::now()) else {
        info!("Session {} has expired, skipping snapshot", session.id());
        return;
    };
    let snapshot = match session.replica().encode_state() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("Failed to encode snapshot of session {}: {}", session.id(), e);
            return;
        }
    };
    if let Err(e) = db.save_snapshot(session.id(), snapshot, ttl).await {
        error!("Failed to persist snapshot of session {}: {}", session.id(), e);
    }
}
