use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Session store is reachable", body = HealthResponse),
        (status = 503, description = "Session store is not reachable", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Live session counts and process resource usage
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Diagnostics", body = DiagnosticsResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Start a collaboration session on a note
#[utoipa::path(
    post,
    path = "/api/v1/sessions",
    request_body = SessionCreateRequest,
    responses(
        (status = 201, description = "Session created", body = SessionCreateResponse),
        (status = 400, description = "Invalid note or host id", body = ErrorResponse),
        (status = 500, description = "Session store failure", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn session_create_doc() {}

/// Validate a session for a joining participant
#[utoipa::path(
    post,
    path = "/api/v1/sessions/{session_id}/join",
    params(("session_id" = String, Path, description = "Session id")),
    request_body = SessionJoinRequest,
    responses(
        (status = 200, description = "Session can be joined", body = SessionJoinResponse),
        (status = 400, description = "Malformed session or participant id", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 410, description = "Session expired", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn session_join_doc() {}

/// Session status with the participants currently present
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{session_id}",
    params(("session_id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session status", body = SessionStatusResponse),
        (status = 400, description = "Malformed session id", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 410, description = "Session expired", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn session_status_doc() {}

/// End a session and delete all of its stored state
#[utoipa::path(
    delete,
    path = "/api/v1/sessions/{session_id}",
    params(("session_id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session ended", body = SessionEndResponse),
        (status = 400, description = "Malformed session id", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn session_end_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        diagnostics_doc,
        session_create_doc,
        session_join_doc,
        session_status_doc,
        session_end_doc,
    ),
    components(
        schemas(
            HealthResponse,
            DiagnosticsResponse,
            ErrorResponse,
            SessionCreateRequest,
            SessionCreateResponse,
            SessionJoinRequest,
            SessionJoinResponse,
            SessionStatusResponse,
            SessionEndResponse,
            ParticipantPresence,
        )
    ),
    tags(
        (name = "sessions", description = "Collaboration session endpoints")
    )
)]
pub struct ApiDoc;
