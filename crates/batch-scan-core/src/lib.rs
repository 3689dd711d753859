//! Core domain types shared across the entire batch-scan workspace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Work Items
// =============================================================================

/// Identity of a work item: one commit of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkItemId {
    /// Repository clone URL as given in the input.
    pub repository_url: String,
    /// Full commit hash.
    pub commit_sha: String,
}

impl WorkItemId {
    /// Build an identity from its two parts.
    pub fn new(repository_url: impl Into<String>, commit_sha: impl Into<String>) -> Self {
        Self {
            repository_url: repository_url.into().trim().to_string(),
            commit_sha: commit_sha.into().trim().to_string(),
        }
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository_url, self.commit_sha)
    }
}

/// One unit of scan work read from the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Repository clone URL.
    pub repository_url: String,
    /// Commit to scan.
    pub commit_sha: String,
    /// Analyzer project key.
    pub project_key: String,
}

impl WorkItem {
    /// Create a work item, deriving the project key when none is given.
    ///
    /// The derived key is `<repo_name>_<commit_sha>`.
    pub fn new(
        repository_url: impl Into<String>,
        commit_sha: impl Into<String>,
        project_key: Option<String>,
    ) -> Self {
        let repository_url = repository_url.into().trim().to_string();
        let commit_sha = commit_sha.into().trim().to_string();
        let project_key = project_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| format!("{}_{}", repo_name_from_url(&repository_url), commit_sha));

        Self {
            repository_url,
            commit_sha,
            project_key,
        }
    }

    /// The identity used by the checkpoint ledger.
    pub fn id(&self) -> WorkItemId {
        WorkItemId {
            repository_url: self.repository_url.clone(),
            commit_sha: self.commit_sha.clone(),
        }
    }
}

/// Extract the repository name from a clone URL or path.
///
/// `https://github.com/acme/widgets.git` -> `widgets`
pub fn repo_name_from_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':', '\\'])
        .next()
        .unwrap_or(trimmed);
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        "repo".to_string()
    } else {
        name.to_string()
    }
}

/// Extract `(owner, repo)` from a GitHub URL, if it is one.
pub fn github_slug(url: &str) -> Option<(String, String)> {
    let (_, rest) = url.split_once("github.com")?;
    let rest = rest.trim_start_matches([':', '/']);
    let mut parts = rest.trim_end_matches('/').split('/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty())?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    Some((owner.to_string(), repo.to_string()))
}

// =============================================================================
// Checkpoint Types
// =============================================================================

/// Last known outcome of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// Scanned successfully. Terminal: never scanned again.
    Processed,
    /// Last attempt failed. Retried on the next run.
    Failed,
}

impl ScanStatus {
    /// Lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Processed => "processed",
            ScanStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of a work item's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Repository clone URL.
    pub repository_url: String,
    /// Commit hash.
    pub commit_sha: String,
    /// Analyzer project key used for the scan.
    #[serde(default)]
    pub project_key: String,
    /// Outcome.
    pub status: ScanStatus,
    /// When the outcome was recorded (unix millis).
    pub updated_at: u64,
    /// Failure summary, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckpointRecord {
    /// Build a record for an item with the current timestamp.
    pub fn new(item: &WorkItem, status: ScanStatus, error: Option<String>) -> Self {
        Self {
            repository_url: item.repository_url.clone(),
            commit_sha: item.commit_sha.clone(),
            project_key: item.project_key.clone(),
            status,
            updated_at: now_millis(),
            error,
        }
    }

    /// Identity of the recorded item.
    pub fn id(&self) -> WorkItemId {
        WorkItemId {
            repository_url: self.repository_url.clone(),
            commit_sha: self.commit_sha.clone(),
        }
    }

    /// Whether this record excludes the item from future runs.
    pub fn is_processed(&self) -> bool {
        self.status == ScanStatus::Processed
    }
}

// =============================================================================
// Scan Results
// =============================================================================

/// Binary classification of one scan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Success,
    Failure,
}

/// Result of running one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Success or failure.
    pub status: ScanOutcome,
    /// Human-readable detail (error summary on failure).
    pub detail: String,
}

impl ScanResult {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            status: ScanOutcome::Success,
            detail: detail.into(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            status: ScanOutcome::Failure,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ScanOutcome::Success
    }
}

/// Aggregate counts for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Items scanned successfully in this run.
    pub succeeded: usize,
    /// Items whose scan failed in this run.
    pub failed: usize,
    /// Items skipped (already processed or duplicated in the input).
    pub skipped: usize,
    /// Input rows dropped for missing repository or commit.
    pub invalid: usize,
    /// Whether dispatch stopped early on a shutdown signal.
    pub cancelled: bool,
}

impl BatchSummary {
    /// Items that reached the executor.
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

// =============================================================================
// Jobs (service mode)
// =============================================================================

/// Opaque identifier of a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Overall state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    CompletedWithErrors,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
        }
    }

    /// Whether the job can still change.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a stored upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Stored, never queued (or reset after an interrupted run).
    #[default]
    Uploaded,
    Queued,
    Running,
    Completed,
    Error,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::Queued => "queued",
            UploadStatus::Running => "running",
            UploadStatus::Completed => "completed",
            UploadStatus::Error => "error",
        }
    }

    /// Queued or running: a second job must not be started.
    pub fn is_busy(&self) -> bool {
        matches!(self, UploadStatus::Queued | UploadStatus::Running)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-item counters of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Progress event emitted by the scheduler for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// The scheduler picked the job up.
    Started,
    /// An item was skipped without scanning.
    ItemSkipped,
    /// An item was handed to an executor.
    ItemStarted,
    /// An executor finished an item.
    ItemFinished(ScanOutcome),
    /// The run ended; `error` is set when it aborted.
    Finished { error: Option<String> },
}

/// In-memory tracking handle for a submitted batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    /// Reference to the submitted batch (upload name or file path).
    pub source: String,
    pub status: JobStatus,
    pub counts: JobCounts,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// A queued job with `total` pending items.
    pub fn new(source: impl Into<String>, total: usize) -> Self {
        Self {
            job_id: JobId::new(),
            source: source.into(),
            status: JobStatus::Queued,
            counts: JobCounts {
                pending: total,
                ..JobCounts::default()
            },
            created_at: now_millis(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Fold a progress event into the job state.
    pub fn apply(&mut self, event: JobEvent) {
        let counts = &mut self.counts;
        match event {
            JobEvent::Started => {
                self.status = JobStatus::Running;
                self.started_at = Some(now_millis());
            }
            JobEvent::ItemSkipped => {
                counts.pending = counts.pending.saturating_sub(1);
                counts.skipped += 1;
            }
            JobEvent::ItemStarted => {
                counts.pending = counts.pending.saturating_sub(1);
                counts.running += 1;
            }
            JobEvent::ItemFinished(outcome) => {
                counts.running = counts.running.saturating_sub(1);
                match outcome {
                    ScanOutcome::Success => counts.succeeded += 1,
                    ScanOutcome::Failure => counts.failed += 1,
                }
            }
            JobEvent::Finished { error } => {
                // Rows never reached (cancellation, invalid input) stop being pending.
                counts.pending = 0;
                counts.running = 0;
                self.status = if error.is_some() || counts.failed > 0 {
                    JobStatus::CompletedWithErrors
                } else {
                    JobStatus::Completed
                };
                self.error = error;
                self.finished_at = Some(now_millis());
            }
        }
    }
}
