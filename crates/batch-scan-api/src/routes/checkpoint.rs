//! Checkpoint endpoints.

use std::sync::Arc;

use axum::extract::State;
use batch_scan_core::CheckpointRecord;
use batch_scan_ops::{RepoSummary, StatusRequest, StatusResponse};

use crate::types::{ApiError, ApiResponse, ApiState};

/// GET /api/checkpoint - Ledger totals.
pub async fn status_handler(
    State(state): State<Arc<ApiState>>,
) -> Result<ApiResponse<StatusResponse>, ApiError> {
    let status = state.ctx.status(StatusRequest::default()).await?;
    Ok(ApiResponse::new(status))
}

/// GET /api/checkpoint/failed - Failed items, most recent first.
pub async fn failed_handler(
    State(state): State<Arc<ApiState>>,
) -> ApiResponse<Vec<CheckpointRecord>> {
    ApiResponse::new(state.ctx.failed().await)
}

/// GET /api/repos - Per-repository totals.
pub async fn repos_handler(State(state): State<Arc<ApiState>>) -> ApiResponse<Vec<RepoSummary>> {
    ApiResponse::new(state.ctx.repos().await)
}
