//! Scan command implementation.
//!
//! Runs one batch over an input CSV against the configured checkpoint.

use std::path::PathBuf;

use anyhow::Result;
use batch_scan_ops::{Config, OpsContext, ScanRequest};

use super::shutdown_token;

/// Execute the scan command.
pub async fn execute(
    config: Config,
    input: PathBuf,
    concurrency: Option<usize>,
    batch_size: Option<usize>,
    json: bool,
) -> Result<()> {
    let ctx = OpsContext::new(config)?;
    let cancel = shutdown_token();

    let request = ScanRequest::new(input)
        .with_concurrency(concurrency)
        .with_batch_size(batch_size);
    let response = ctx.scan(request, &cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let summary = &response.summary;
    println!();
    println!("📊 Scan Summary");
    println!("{:─<50}", "");
    println!("✅ Succeeded:   {}", summary.succeeded);
    println!("❌ Failed:      {}", summary.failed);
    println!("⏭️  Skipped:     {}", summary.skipped);
    if summary.invalid > 0 {
        println!("⚠️  Invalid rows: {}", summary.invalid);
    }
    println!();
    println!(
        "💾 Checkpoint:  {} ({} processed, {} failed)",
        response.checkpoint.display(),
        response.stats.processed,
        response.stats.failed
    );

    if summary.cancelled {
        println!();
        println!("⏸️  Interrupted. Run the same command again to resume.");
    } else if summary.failed > 0 {
        println!();
        println!("Failed items are retried on the next run; see `bscan status --failed`.");
    }

    Ok(())
}
