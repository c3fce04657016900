use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::models::{ApiError, SessionEndResponse};
use crate::state::AppState;

/// End a session: close its sockets and delete all of its stored state
pub async fn session_end(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<SessionEndResponse>), ApiError> {
    let response = state.sessions.end(&session_id).await?;
    Ok((StatusCode::OK, Json(response)))
}
