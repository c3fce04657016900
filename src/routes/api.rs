use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{
    diagnostics, health_check, ready_check, session_create, session_end, session_join, session_status,
};
use crate::state::AppState;

/// Create API routes
pub fn create_api_routes(state: AppState) -> Router {
    Router::<AppState>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/sessions", post(session_create))
        .route("/v1/sessions/:session_id", get(session_status).delete(session_end))
        .route("/v1/sessions/:session_id/join", post(session_join))
        .with_state(state)
}
