//! CLI command implementations.

pub mod checkpoint;
pub mod config;
pub mod doctor;
pub mod scan;
pub mod serve;
pub mod status;

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A token cancelled on the first Ctrl+C.
pub(crate) fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, waiting for in-flight scans");
            token.cancel();
        }
    });
    cancel
}
