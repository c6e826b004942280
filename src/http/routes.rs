use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Call credentials
        .route("/api/create-retell-call", post(handlers::create_retell_call))
        .route(
            "/api/get-elevenlabs-signed-url",
            get(handlers::get_elevenlabs_signed_url),
        )
        // Post-call data
        .route("/api/get-call-data", get(handlers::get_call_data))
        // Request logging, and CORS for browser clients on another origin
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
