//! Health check endpoint.

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::types::{ApiResponse, ApiState, HealthResponse};

/// Handler for GET /api/health
pub async fn health_handler(
    State(state): State<Arc<ApiState>>,
) -> Json<ApiResponse<HealthResponse>> {
    // A closed registry reports no jobs rather than failing the health check.
    let active_jobs = match state.batches.registry().list().await {
        Ok(jobs) => jobs.iter().filter(|j| j.status.is_active()).count(),
        Err(_) => 0,
    };
    let response = HealthResponse {
        status: "ok".to_string(),
        checkpoint: state.ctx.store().stats().await,
        active_jobs,
    };
    Json(ApiResponse::new(response))
}
