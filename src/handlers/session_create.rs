use axum::{extract::State, http::StatusCode, Json};

use crate::models::{ApiError, SessionCreateRequest, SessionCreateResponse};
use crate::state::AppState;

/// Start a collaboration session on a note
pub async fn session_create(
    State(state): State<AppState>,
    Json(request): Json<SessionCreateRequest>,
) -> Result<(StatusCode, Json<SessionCreateResponse>), ApiError> {
    let response = state.sessions.create(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}
