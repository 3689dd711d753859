//! Response DTOs for operations.
//!
//! Each response type contains all the data produced by an operation,
//! making it easy to consume from CLI, REST API, or programmatically.

use std::collections::BTreeMap;
use std::path::PathBuf;

use batch_scan_core::{BatchSummary, CheckpointRecord, JobId, UploadStatus};
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointStats;

/// Response from a scan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResponse {
    /// Input that was scanned.
    pub input: PathBuf,

    /// Counts for this run.
    pub summary: BatchSummary,

    /// Checkpoint the run wrote to.
    pub checkpoint: PathBuf,

    /// Ledger totals after the run.
    pub stats: CheckpointStats,
}

/// Response from a status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub checkpoint: PathBuf,

    /// Whether the checkpoint file exists yet.
    pub exists: bool,

    pub stats: CheckpointStats,

    /// Failed records, when requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<CheckpointRecord>,
}

/// Response from a checkpoint merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResponse {
    pub source: PathBuf,

    /// Records read from the source.
    pub read: usize,

    /// Records that changed the active ledger.
    pub changed: usize,

    pub stats: CheckpointStats,
}

/// A stored upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadInfo {
    pub upload_id: String,

    /// Original file name.
    pub name: String,

    pub created_at: u64,

    /// Valid rows.
    pub total_commits: usize,

    /// Rows missing repository or commit.
    pub invalid: usize,

    /// Valid rows per repository.
    pub repos: BTreeMap<String, usize>,

    #[serde(default)]
    pub status: UploadStatus,

    /// Latest job started for this upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,

    /// Why the latest job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Uploads queued by a bulk scan request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanPendingResponse {
    pub queued: Vec<UploadInfo>,
}
