//! Job endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use batch_scan_core::{Job, JobId};
use batch_scan_ops::OpsError;

use crate::types::{ApiError, ApiResponse, ApiState};

/// GET /api/jobs - All jobs, newest first.
pub async fn list_handler(
    State(state): State<Arc<ApiState>>,
) -> Result<ApiResponse<Vec<Job>>, ApiError> {
    let jobs = state.batches.registry().list().await?;
    Ok(ApiResponse::new(jobs))
}

/// GET /api/jobs/{id} - One job.
pub async fn status_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Job>, ApiError> {
    // An id we could never have issued is just as unknown.
    let job_id = JobId::parse(&id).ok_or(OpsError::JobNotFound { id })?;
    let job = state.batches.registry().status(job_id).await?;
    Ok(ApiResponse::new(job))
}
