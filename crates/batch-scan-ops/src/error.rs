//! Error types for the operations layer.

use std::path::PathBuf;

use batch_scan_core::UploadStatus;
use batch_scan_git::ResolveError;
use thiserror::Error;

/// Result type for operations.
pub type OpsResult<T> = Result<T, OpsError>;

/// Errors that can occur during operations.
#[derive(Debug, Error)]
pub enum OpsError {
    /// The checkpoint could not be written. Fatal to a run.
    #[error("Failed to persist checkpoint {path}: {message}")]
    CheckpointPersist { path: PathBuf, message: String },

    /// A checkpoint file given for merging could not be read.
    #[error("Checkpoint {path} is unreadable: {message}")]
    CheckpointCorrupt { path: PathBuf, message: String },

    /// Input file not found.
    #[error("Input file not found: {path}")]
    InputNotFound { path: PathBuf },

    /// Input CSV could not be read.
    #[error("Invalid input: {0}")]
    Input(String),

    /// No stored upload with this id.
    #[error("Upload not found: {id}")]
    UploadNotFound { id: String },

    /// The upload already has a queued or running job.
    #[error("Upload {id} is already {status}")]
    UploadBusy { id: String, status: UploadStatus },

    /// No job with this id.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// The job registry or batch runner has shut down.
    #[error("Service unavailable: {0}")]
    ServiceClosed(&'static str),

    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl OpsError {
    pub fn checkpoint_persist(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CheckpointPersist {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<csv::Error> for OpsError {
    fn from(err: csv::Error) -> Self {
        OpsError::Input(err.to_string())
    }
}

/// Why one work item failed. Never escapes the executor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    /// Commit not reachable from the repository or any fork found.
    #[error("commit unresolvable: {0}")]
    CommitUnresolvable(String),

    /// Every search token is throttled until `retry_at` (unix seconds).
    #[error("search tokens exhausted until {retry_at}")]
    AuthExhausted { retry_at: u64 },

    /// Analyzer reported failure or timed out.
    #[error("analyzer failed: {0}")]
    AnalyzerFailure(String),

    /// Local clone or filesystem setup failed.
    #[error("workspace preparation failed: {0}")]
    WorkspacePrep(String),
}

impl From<ResolveError> for ScanError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::CommitUnresolvable { .. } => ScanError::CommitUnresolvable(err.to_string()),
            ResolveError::AuthExhausted { retry_at } => ScanError::AuthExhausted { retry_at },
            other => ScanError::WorkspacePrep(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_errors_map_to_scan_errors() {
        let err: ScanError = ResolveError::AuthExhausted { retry_at: 42 }.into();
        assert_eq!(err, ScanError::AuthExhausted { retry_at: 42 });

        let err: ScanError = ResolveError::CommitUnresolvable {
            commit: "abc".into(),
            reason: "gone".into(),
        }
        .into();
        assert!(matches!(err, ScanError::CommitUnresolvable(ref m) if m.contains("abc")));

        let err: ScanError = ResolveError::Task("panicked".into()).into();
        assert!(matches!(err, ScanError::WorkspacePrep(_)));
    }
}
