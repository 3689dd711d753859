//! Request DTOs for operations.
//!
//! Each request type encapsulates all the parameters needed for an operation,
//! making it easy to call from CLI, REST API, or programmatically.

use std::path::PathBuf;

use batch_scan_core::WorkItemId;
use serde::{Deserialize, Serialize};

/// Request to scan an input CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Input CSV path.
    pub input: PathBuf,

    /// Override the configured concurrency.
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Override the configured chunk size.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl ScanRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            concurrency: None,
            batch_size: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: Option<usize>) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Request for checkpoint status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusRequest {
    /// Include failed records with their error detail.
    #[serde(default)]
    pub include_failed: bool,
}

/// Request to mark an item processed by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkProcessedRequest {
    pub repository_url: String,
    pub commit_sha: String,
    #[serde(default)]
    pub project_key: Option<String>,
}

impl MarkProcessedRequest {
    pub fn id(&self) -> WorkItemId {
        WorkItemId::new(self.repository_url.clone(), self.commit_sha.clone())
    }
}

/// Request to fold another checkpoint file into the active one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeCheckpointRequest {
    pub source: PathBuf,
}

/// Request to store an uploaded CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Original file name, for display.
    pub name: String,
    /// CSV text.
    pub content: String,
}
