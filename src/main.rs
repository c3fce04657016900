mod auth;
mod config;
mod db;
mod docs;
mod handlers;
mod models;
mod replica;
mod routes;
mod services;
mod state;
mod ws;

use config::Config;
use db::memstore::MemoryStore;
use replica::LoroReplicaFactory;
use routes::create_router;
use state::AppState;
use std::panic;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Configuration first, so its log level can seed the default filter
    let loaded = Config::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(&config.log_level)))
        .init();

    info!("Starting server...");

    match &loaded {
        Ok(_) => info!("✅ Configuration loaded ({} environment)", config.environment),
        Err(e) => {
            error!("❌ Failed to load configuration: {}", e);
            warn!("Using default configuration");
        }
    }
    if config.participant_token_secret.is_none() {
        if config.is_development() {
            info!("No participant token secret configured - participants declare their own ids");
        } else {
            warn!(
                "No participant token secret configured in {} - participants declare their own ids",
                config.environment
            );
        }
    }

    let address = config.server_address();
    let state = AppState::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(LoroReplicaFactory),
    );
    let sweeper = state.sweeper().spawn();

    let app_routes = create_router(state.clone());

    // Start the HTTP/API server
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", address));

    info!("🚀 Server running on http://{}", address);
    info!("📡 Session sockets available at ws://{}/ws/:session_id", address);
    info!("📚 Swagger UI available at http://{}/swagger", address);

    if let Err(e) = axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    sweeper.abort();
    state.registry.shutdown().await;
    info!("Server stopped");
}

/// `LOG_LEVEL` for the app and the HTTP layer; `RUST_LOG` still overrides everything
fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(format!(
        "colabri_session={0},tower_http={0},axum::rejection=trace,info",
        level
    ))
    .unwrap_or_else(|_| EnvFilter::new("colabri_session=info,tower_http=info,info"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
