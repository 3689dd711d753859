//! Serve command implementation.
//!
//! Runs the REST API (via batch-scan-api) with a background batch runner.
//!
//! ## Architecture
//!
//! - `/api/*` - REST endpoints
//! - Uploaded CSVs are queued and scanned one batch at a time against the
//!   configured checkpoint.
//!
//! Ctrl+C stops accepting requests, lets the running batch drain its
//! in-flight scans, then exits. Its upload stays `running` and is queued
//! again on the next start.

use std::net::SocketAddr;

use anyhow::Result;
use axum::Router;
use batch_scan_api::{create_api_router, create_api_state};
use batch_scan_ops::{Config, OpsContext};
use tokio::net::TcpListener;
use tracing::info;

use super::shutdown_token;

/// Execute the serve command.
pub async fn execute(config: Config, port: u16) -> Result<()> {
    let ctx = OpsContext::new(config)?;
    let checkpoint = ctx.store().path().to_path_buf();
    let cancel = shutdown_token();

    let state = create_api_state(ctx, cancel.clone()).await;
    let app = Router::new().nest("/api", create_api_router(state.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    // Print server info
    println!();
    println!("🚀 bscan Server");
    println!("   API:        http://localhost:{}/api/health", port);
    println!("   Checkpoint: {}", checkpoint.display());
    println!();
    println!("   Press Ctrl+C to stop");
    println!();

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    // The running batch drains its in-flight scans before we exit.
    state.batches.stopped().await;
    info!("Server stopped");

    Ok(())
}
