//! API types and DTOs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use batch_scan_ops::{BatchService, CheckpointStats, OpsContext, OpsError};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::error;

/// Shared application state for the API.
pub struct ApiState {
    /// Operations over the shared checkpoint.
    pub ctx: OpsContext,
    /// Background runner for submitted batches.
    pub batches: BatchService,
}

/// Response wrapper with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Response data.
    pub data: T,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

impl<T> ApiResponse<T> {
    /// Create a new API response with current timestamp.
    pub fn new(data: T) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self { data, timestamp }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Checkpoint totals.
    pub checkpoint: CheckpointStats,
    /// Jobs queued or running.
    pub active_jobs: usize,
}

/// Error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
}

/// Query parameters for `POST /uploads`.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Original file name.
    #[serde(default)]
    pub name: Option<String>,
    /// Queue a scan of the upload right away.
    #[serde(default)]
    pub scan: bool,
}

/// An [`OpsError`] on its way to becoming an HTTP response.
pub struct ApiError(pub OpsError);

impl From<OpsError> for ApiError {
    fn from(e: OpsError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            OpsError::UploadNotFound { .. } => (StatusCode::NOT_FOUND, "UPLOAD_NOT_FOUND"),
            OpsError::JobNotFound { .. } => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
            OpsError::UploadBusy { .. } => (StatusCode::CONFLICT, "UPLOAD_BUSY"),
            OpsError::Input(_) | OpsError::InputNotFound { .. } => {
                (StatusCode::BAD_REQUEST, "INVALID_INPUT")
            }
            OpsError::ServiceClosed(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_CLOSED"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        if status.is_server_error() {
            error!(code, "{}", self.0);
        }
        (
            status,
            Json(ApiResponse::new(ErrorResponse {
                code: code.to_string(),
                message: self.0.to_string(),
            })),
        )
            .into_response()
    }
}
