use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::ParticipantPresence;

/// Current state of a session as seen by the store and this process
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub note_id: String,
    pub host_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub participant_count: usize,
    pub participants: Vec<ParticipantPresence>,
    /// Whether this process holds an in-memory replica for the session
    pub live: bool,
    pub connections: usize,
}
