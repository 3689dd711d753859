//! Error types for commit resolution.

use thiserror::Error;

/// Errors produced while preparing or resolving a commit.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The commit is not reachable from the primary remote nor any fork found.
    #[error("Commit {commit} could not be resolved: {reason}")]
    CommitUnresolvable { commit: String, reason: String },

    /// Every search token is cooling down. Retry after `retry_at` (unix seconds).
    #[error("All search tokens are rate limited until {retry_at}")]
    AuthExhausted { retry_at: u64 },

    /// Local git operation failed.
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// IO error while laying out a workspace.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking git task panicked or was cancelled.
    #[error("Git task failed: {0}")]
    Task(String),
}

impl ResolveError {
    pub(crate) fn unresolvable(commit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CommitUnresolvable {
            commit: commit.into(),
            reason: reason.into(),
        }
    }
}

impl From<tokio::task::JoinError> for ResolveError {
    fn from(err: tokio::task::JoinError) -> Self {
        ResolveError::Task(err.to_string())
    }
}
