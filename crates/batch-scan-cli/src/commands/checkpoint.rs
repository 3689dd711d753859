//! Checkpoint command implementations.

use std::path::PathBuf;

use anyhow::Result;
use batch_scan_ops::{Config, MarkProcessedRequest, MergeCheckpointRequest, OpsContext};

/// Mark a commit processed by hand.
pub async fn mark(
    config: Config,
    repository_url: String,
    commit_sha: String,
    project_key: Option<String>,
) -> Result<()> {
    let ctx = OpsContext::new(config)?;
    let record = ctx
        .mark_processed(MarkProcessedRequest {
            repository_url,
            commit_sha,
            project_key,
        })
        .await?;

    println!(
        "✅ Marked {}@{} as processed",
        record.repository_url, record.commit_sha
    );
    Ok(())
}

/// Merge another checkpoint file into the active one.
pub async fn merge(config: Config, source: PathBuf) -> Result<()> {
    let ctx = OpsContext::new(config)?;
    let response = ctx
        .merge_checkpoint(MergeCheckpointRequest { source })
        .await?;

    println!(
        "🔀 Merged {}: {} records read, {} changed",
        response.source.display(),
        response.read,
        response.changed
    );
    println!(
        "   Now {} processed, {} failed",
        response.stats.processed, response.stats.failed
    );
    Ok(())
}

/// Print per-repository totals.
pub async fn repos(config: Config) -> Result<()> {
    let ctx = OpsContext::new(config)?;
    let repos = ctx.repos().await;

    if repos.is_empty() {
        println!("No checkpoint records yet");
        return Ok(());
    }

    println!("{:<60} {:>9} {:>7}", "REPOSITORY", "PROCESSED", "FAILED");
    for repo in repos {
        println!(
            "{:<60} {:>9} {:>7}",
            repo.repository_url, repo.processed, repo.failed
        );
    }
    Ok(())
}
