use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::models::{ApiError, SessionStatusResponse};
use crate::state::AppState;

pub async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<SessionStatusResponse>), ApiError> {
    let response = state.sessions.status(&session_id).await?;
    Ok((StatusCode::OK, Json(response)))
}
