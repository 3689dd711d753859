//! Status command implementation.

use anyhow::Result;
use batch_scan_ops::{Config, OpsContext, StatusRequest};

/// Execute the status command.
pub async fn execute(config: Config, include_failed: bool, json: bool) -> Result<()> {
    let ctx = OpsContext::new(config)?;
    let status = ctx.status(StatusRequest { include_failed }).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("📊 Checkpoint Status");
    println!("{:─<50}", "");
    println!("📍 File:       {}", status.checkpoint.display());
    if !status.exists {
        println!("   (not created yet)");
    }
    println!("📦 Records:    {}", status.stats.total);
    println!("✅ Processed:  {}", status.stats.processed);
    println!("❌ Failed:     {}", status.stats.failed);

    if include_failed && !status.failed.is_empty() {
        println!();
        println!("Failed items:");
        for record in &status.failed {
            println!(
                "   • {}@{}: {}",
                record.repository_url,
                record.commit_sha,
                record.error.as_deref().unwrap_or("(no detail)")
            );
        }
    }

    Ok(())
}
