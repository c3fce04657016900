use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request payload for joining a session
#[derive(Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionJoinRequest {
    pub participant_id: Option<String>,
    pub display_name: Option<String>,
}

/// Response returned to a joining participant
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionJoinResponse {
    pub session_id: String,
    pub note_id: String,
    pub expires_at: DateTime<Utc>,
    pub participant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_token: Option<String>,
    pub ws_path: String,
}
