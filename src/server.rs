use crate::ingest::handler::{track_event, track_hit, AppState, MAX_EVENT_BODY};
use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Permissive CORS for ingestion (tracking script runs on any origin)
    let ingestion_cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let ingestion_routes = Router::new()
        .route("/hit", get(track_hit))
        .route("/event", post(track_event))
        .layer(DefaultBodyLimit::max(MAX_EVENT_BODY))
        .layer(ingestion_cors);

    Router::new()
        .route("/health", get(health_check))
        .merge(ingestion_routes)
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            std::time::Duration::from_secs(30),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health: Simple health check endpoint.
async fn health_check() -> &'static str {
    "ok"
}
