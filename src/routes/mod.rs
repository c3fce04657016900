pub mod api;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::docs::ApiDoc;
use crate::handlers::ws_handler;
use crate::state::AppState;
pub use api::create_api_routes;

/// Full application router: REST API, session sockets and Swagger UI
pub fn create_router(state: AppState) -> Router {
    let ws_routes = Router::<AppState>::new()
        .route("/ws/:session_id", get(ws_handler))
        .with_state(state.clone());

    Router::new()
        // Mount API routes
        .nest("/api", create_api_routes(state))
        .merge(ws_routes)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
}
