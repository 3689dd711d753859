//! REST API service for batch commit scanning.
//!
//! Exposes the checkpoint, stored uploads and background scan jobs over
//! HTTP. All responses are wrapped in an [`ApiResponse`] envelope.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check with checkpoint totals
//! - `GET /api/uploads` - Stored uploads, newest first
//! - `POST /api/uploads?name=...&scan=...` - Store a CSV (body), optionally queue it
//! - `POST /api/uploads/{id}/scan` - Queue a stored upload (409 while queued or running)
//! - `POST /api/uploads/scan_all_pending` - Queue every upload not yet scanned or last failed
//! - `GET /api/jobs` - All jobs, newest first
//! - `GET /api/jobs/{id}` - One job
//! - `GET /api/checkpoint` - Checkpoint totals
//! - `GET /api/checkpoint/failed` - Failed items with error detail
//! - `GET /api/repos` - Per-repository checkpoint summary
//!
//! ## Usage
//!
//! ```rust,no_run
//! use batch_scan_api::{create_api_router, create_api_state};
//! use batch_scan_ops::OpsContext;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = OpsContext::default_config()?;
//! let state = create_api_state(ctx, CancellationToken::new()).await;
//! let app = axum::Router::new().nest("/api", create_api_router(state));
//! # Ok(())
//! # }
//! ```

mod routes;
mod types;

pub use routes::create_api_router;
pub use types::{ApiError, ApiResponse, ApiState, ErrorResponse, HealthResponse, UploadQuery};

use std::sync::Arc;

use batch_scan_ops::{BatchService, OpsContext};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Create the API state and start the background batch runner.
///
/// Uploads left queued or running by a previous process are queued again.
/// Cancelling `cancel` drains the running batch and stops the runner.
pub async fn create_api_state(ctx: OpsContext, cancel: CancellationToken) -> Arc<ApiState> {
    let batches = BatchService::start(ctx.scheduler(), ctx.uploads().clone(), cancel);
    if let Err(e) = batches.resume_interrupted().await {
        warn!(error = %e, "Cannot resume interrupted uploads");
    }
    Arc::new(ApiState { ctx, batches })
}
