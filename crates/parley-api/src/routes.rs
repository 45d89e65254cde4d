//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression,
//! and all endpoint handlers.

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use parley_core::error::ParleyError;

use crate::handlers;
use crate::state::AppState;

/// Largest accepted request body (voice uploads included).
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/chat", post(handlers::chat))
        .route("/speak", post(handlers::speak))
        .route("/voice", post(handlers::voice))
        .route("/voice_chat", post(handlers::voice_chat))
        .route("/translate", post(handlers::translate))
        .route("/available_languages", get(handlers::available_languages))
        .route("/start_voice_session", post(handlers::start_voice_session))
        .route("/get_conversations", get(handlers::get_conversations))
        .route("/clear_conversation", post(handlers::clear_conversation))
        .route("/delete_conversation", post(handlers::delete_conversation))
        .route("/load_chat", post(handlers::load_chat))
        .route(
            "/settings",
            get(handlers::get_settings).post(handlers::update_settings),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` resolves.
///
/// In-flight requests are allowed to finish before this returns.
pub async fn start_server<F>(
    addr: SocketAddr,
    state: AppState,
    shutdown: F,
) -> Result<(), ParleyError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ParleyError::Config(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!("Starting API server on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}
