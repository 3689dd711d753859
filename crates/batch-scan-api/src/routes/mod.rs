//! API route handlers.

mod checkpoint;
mod health;
mod jobs;
mod uploads;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::types::ApiState;

/// Largest accepted upload body.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Create the API router with all endpoints.
///
/// Routes are relative; mount the router under `/api`.
pub fn create_api_router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health::health_handler))
        // Uploads
        .route(
            "/uploads",
            get(uploads::list_handler).post(uploads::upload_handler),
        )
        .route("/uploads/{id}/scan", post(uploads::scan_handler))
        .route("/uploads/scan_all_pending", post(uploads::scan_pending_handler))
        // Jobs
        .route("/jobs", get(jobs::list_handler))
        .route("/jobs/{id}", get(jobs::status_handler))
        // Checkpoint
        .route("/checkpoint", get(checkpoint::status_handler))
        .route("/checkpoint/failed", get(checkpoint::failed_handler))
        .route("/repos", get(checkpoint::repos_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        // Request tracing (enable with RUST_LOG=tower_http=info or higher)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .level(Level::INFO)
                        .include_headers(false),
                )
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .with_state(state)
}
