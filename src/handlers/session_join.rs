use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::models::{ApiError, SessionJoinRequest, SessionJoinResponse};
use crate::state::AppState;

/// Check that a session can be joined and hand out the participant's identity.
/// The body is optional; an empty request gets a generated participant id.
pub async fn session_join(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    request: Option<Json<SessionJoinRequest>>,
) -> Result<(StatusCode, Json<SessionJoinResponse>), ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let response = state.sessions.join(&session_id, request).await?;
    Ok((StatusCode::OK, Json(response)))
}
