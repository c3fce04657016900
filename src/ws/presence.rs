use chrono::Utc;
use tracing::debug;

use crate::db::dbsession::DbSession;
use crate::db::store::StoreError;
use crate::models::{ParticipantPresence, PresencePayload, SessionMetadata};

const MAX_DISPLAY_NAME_CHARS: usize = 64;

const PALETTE: [&str; 8] = [
    "#e6194b", "#3cb44b", "#4363d8", "#f58231", "#911eb4", "#42d4f4", "#f032e6", "#9a6324",
];

/// Who is attaching, as far as the relay knows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub id: String,
    pub display_name: Option<String>,
    pub color: Option<String>,
}

impl ParticipantInfo {
    #[cfg(test)]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            color: None,
        }
    }
}

/// Writes presence records; every record lives as long as the session itself.
#[derive(Clone)]
pub struct PresenceTracker {
    db: DbSession,
}

impl PresenceTracker {
    pub fn new(db: DbSession) -> Self {
        Self { db }
    }

    /// Write or refresh the record of a participant that just attached
    pub async fn join(
        &self,
        metadata: &SessionMetadata,
        participant: &ParticipantInfo,
    ) -> Result<ParticipantPresence, StoreError> {
        let presence = ParticipantPresence {
            participant_id: participant.id.clone(),
            display_name: participant
                .display_name
                .as_deref()
                .and_then(clean_display_name)
                .unwrap_or_else(|| participant.id.clone()),
            color: participant
                .color
                .as_deref()
                .filter(|c| is_hex_color(c))
                .map(str::to_string)
                .unwrap_or_else(|| color_for(&participant.id).to_string()),
            cursor: None,
            last_seen: Utc::now(),
        };
        self.write(metadata, &presence).await?;
        Ok(presence)
    }

    /// Merge a presence frame into the stored record and refresh its TTL.
    ///
    /// A missing record means the participant already left, so nothing is written.
    /// `attached` is checked on both sides of the write: a record written for a
    /// participant that detached meanwhile is deleted again. Returns whether the
    /// record was kept.
    pub async fn update(
        &self,
        metadata: &SessionMetadata,
        participant_id: &str,
        payload: PresencePayload,
        attached: impl Fn() -> bool,
    ) -> Result<bool, StoreError> {
        let Some(mut presence) = self.db.load_presence(&metadata.session_id, participant_id).await? else {
            debug!(
                "No presence of {} in session {}, update dropped",
                participant_id, metadata.session_id
            );
            return Ok(false);
        };
        if let Some(name) = payload.display_name.as_deref().and_then(clean_display_name) {
            presence.display_name = name;
        }
        if let Some(color) = payload.color.filter(|c| is_hex_color(c)) {
            presence.color = color;
        }
        if payload.cursor.is_some() {
            presence.cursor = payload.cursor;
        }
        presence.last_seen = Utc::now();

        if !attached() {
            return Ok(false);
        }
        self.write(metadata, &presence).await?;
        if !attached() {
            // The leave ran while we were writing
            self.leave(&metadata.session_id, participant_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    pub async fn leave(&self, session_id: &str, participant_id: &str) -> Result<(), StoreError> {
        self.db.delete_presence(session_id, participant_id).await
    }

    pub async fn list(&self, session_id: &str) -> Result<Vec<ParticipantPresence>, StoreError> {
        self.db.list_presence(session_id).await
    }

    async fn write(&self, metadata: &SessionMetadata, presence: &ParticipantPresence) -> Result<(), StoreError> {
        match metadata.remaining_lifetime(Utc::now()) {
            Some(ttl) => self.db.save_presence(&metadata.session_id, presence, ttl).await,
            None => {
                debug!("Session {} expired, presence not written", metadata.session_id);
                Ok(())
            }
        }
    }
}

/// Stable palette color for a participant
pub fn color_for(participant_id: &str) -> &'static str {
    let hash = participant_id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    PALETTE[hash as usize % PALETTE.len()]
}

pub(crate) fn clean_display_name(name: &str) -> Option<String> {
    let name: String = name
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_DISPLAY_NAME_CHARS)
        .collect();
    (!name.is_empty()).then_some(name)
}

fn is_hex_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].bytes().all(|b| b.is_ascii_hexdigit())
}
