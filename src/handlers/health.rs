use axum::{extract::State, http::StatusCode, Json};
use tracing::{debug, error};

use crate::models::HealthResponse;
use crate::state::AppState;

fn health(status: &str, message: &str) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: status.to_string(),
        message: message.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    health("ok", "Server is running")
}

/// Readiness check endpoint; ready once the session store answers
pub async fn ready_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    debug!("Readiness check requested");
    match state.db.ping().await {
        Ok(()) => (StatusCode::OK, health("ok", "Service is ready")),
        Err(e) => {
            error!("Session store is not reachable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                health("unavailable", "Session store is not reachable"),
            )
        }
    }
}
