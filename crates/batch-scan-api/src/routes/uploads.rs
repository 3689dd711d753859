//! Upload endpoints.
//!
//! Uploads are CSV files stored under the work directory. Storing one
//! validates its header and counts rows; scanning one queues a job on the
//! background batch runner and tracks it in the upload's status.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use batch_scan_ops::{ScanPendingResponse, UploadInfo, UploadRequest};

use crate::types::{ApiError, ApiResponse, ApiState, UploadQuery};

/// GET /api/uploads - Stored uploads, newest first.
pub async fn list_handler(
    State(state): State<Arc<ApiState>>,
) -> Result<ApiResponse<Vec<UploadInfo>>, ApiError> {
    let uploads = state.ctx.uploads().list().await?;
    Ok(ApiResponse::new(uploads))
}

/// POST /api/uploads - Store a CSV body, optionally queueing a scan.
pub async fn upload_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<UploadQuery>,
    body: String,
) -> Response {
    let name = query.name.unwrap_or_else(|| "upload.csv".to_string());
    let request = UploadRequest {
        name,
        content: body,
    };

    let mut upload = match state.ctx.uploads().save(request).await {
        Ok(upload) => upload,
        Err(e) => return ApiError(e).into_response(),
    };

    if query.scan {
        upload = match state.batches.submit_upload(&upload.upload_id).await {
            Ok(upload) => upload,
            Err(e) => return ApiError(e).into_response(),
        };
    }

    (StatusCode::CREATED, Json(ApiResponse::new(upload))).into_response()
}

/// POST /api/uploads/{id}/scan - Queue a stored upload.
pub async fn scan_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Response {
    match state.batches.submit_upload(&id).await {
        Ok(upload) => (StatusCode::ACCEPTED, Json(ApiResponse::new(upload))).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// POST /api/uploads/scan_all_pending - Queue every upload that never ran
/// or whose last job failed.
pub async fn scan_pending_handler(State(state): State<Arc<ApiState>>) -> Response {
    match state.batches.scan_pending().await {
        Ok(queued) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::new(ScanPendingResponse { queued })),
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}
