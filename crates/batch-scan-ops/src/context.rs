//! OpsContext - The main service for executing operations.
//!
//! The OpsContext holds configuration, the shared checkpoint and the scan
//! runner, and provides methods for all batch-scan operations. It can be
//! used by CLI, REST API, or any other consumer.

use std::sync::Arc;

use batch_scan_core::CheckpointRecord;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::checkpoint::{CheckpointStore, RepoSummary};
use crate::config::Config;
use crate::error::{OpsError, OpsResult};
use crate::executor::{ScanExecutor, ScanRunner};
use crate::input::InputReader;
use crate::requests::*;
use crate::responses::*;
use crate::scheduler::Scheduler;
use crate::uploads::UploadStore;

/// The main operations context.
///
/// Cheap to clone; clones share the checkpoint and the runner.
#[derive(Clone)]
pub struct OpsContext {
    /// Configuration for operations.
    pub config: Config,
    store: Arc<CheckpointStore>,
    uploads: UploadStore,
    runner: Arc<dyn ScanRunner>,
}

impl std::fmt::Debug for OpsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpsContext")
            .field("config", &self.config)
            .field("checkpoint", &self.store.path())
            .finish()
    }
}

impl OpsContext {
    /// Create a context with the production executor.
    pub fn new(config: Config) -> OpsResult<Self> {
        let runner = Arc::new(ScanExecutor::from_config(&config));
        Self::with_runner(config, runner)
    }

    /// Create a context with a custom runner.
    pub fn with_runner(config: Config, runner: Arc<dyn ScanRunner>) -> OpsResult<Self> {
        config.validate()?;
        let store = Arc::new(CheckpointStore::load(
            config.checkpoint_path(),
            config.checkpoint_flush_every,
        ));
        let uploads = UploadStore::new(config.uploads_dir());
        Ok(Self {
            config,
            store,
            uploads,
            runner,
        })
    }

    /// Create a new OpsContext with configuration from disk and environment.
    pub fn default_config() -> OpsResult<Self> {
        Self::new(Config::load()?)
    }

    pub fn store(&self) -> &Arc<CheckpointStore> {
        &self.store
    }

    /// Uploaded CSVs for service mode.
    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    /// Scheduler over the shared checkpoint with configured limits.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.runner),
            Arc::clone(&self.store),
            self.config.concurrency,
            self.config.batch_size,
        )
    }

    // =========================================================================
    // Scan Operations
    // =========================================================================

    /// Scan every pending row of an input CSV.
    pub async fn scan(
        &self,
        request: ScanRequest,
        cancel: &CancellationToken,
    ) -> OpsResult<ScanResponse> {
        let reader = InputReader::open(&request.input)?;
        let scheduler = Scheduler::new(
            Arc::clone(&self.runner),
            Arc::clone(&self.store),
            request.concurrency.unwrap_or(self.config.concurrency),
            request.batch_size.unwrap_or(self.config.batch_size),
        );

        info!(
            input = %request.input.display(),
            checkpoint = %self.store.path().display(),
            "Starting scan"
        );
        let summary = scheduler.run_batch(reader, cancel, None).await?;

        Ok(ScanResponse {
            input: request.input,
            summary,
            checkpoint: self.store.path().to_path_buf(),
            stats: self.store.stats().await,
        })
    }

    // =========================================================================
    // Checkpoint Operations
    // =========================================================================

    pub async fn status(&self, request: StatusRequest) -> OpsResult<StatusResponse> {
        let failed = if request.include_failed {
            self.store.failed().await
        } else {
            vec![]
        };
        Ok(StatusResponse {
            checkpoint: self.store.path().to_path_buf(),
            exists: self.store.path().exists(),
            stats: self.store.stats().await,
            failed,
        })
    }

    pub async fn mark_processed(
        &self,
        request: MarkProcessedRequest,
    ) -> OpsResult<CheckpointRecord> {
        if request.repository_url.trim().is_empty() || request.commit_sha.trim().is_empty() {
            return Err(OpsError::Input("repository and commit are required".into()));
        }
        let record = self
            .store
            .mark_processed(&request.id(), request.project_key)
            .await?;
        info!(repo = %record.repository_url, commit = %record.commit_sha, "Marked processed");
        Ok(record)
    }

    pub async fn merge_checkpoint(
        &self,
        request: MergeCheckpointRequest,
    ) -> OpsResult<MergeResponse> {
        let records = CheckpointStore::read_records(&request.source)?;
        let read = records.len();
        let changed = self.store.merge(records).await?;
        info!(source = %request.source.display(), read, changed, "Merged checkpoint");

        Ok(MergeResponse {
            source: request.source,
            read,
            changed,
            stats: self.store.stats().await,
        })
    }

    pub async fn repos(&self) -> Vec<RepoSummary> {
        self.store.repo_summary().await
    }

    pub async fn failed(&self) -> Vec<CheckpointRecord> {
        self.store.failed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use batch_scan_core::{ScanResult, WorkItem};
    use tempfile::TempDir;

    /// Fails every commit starting with `bad`.
    struct PickyRunner;

    #[async_trait]
    impl ScanRunner for PickyRunner {
        async fn run(&self, item: &WorkItem) -> ScanResult {
            if item.commit_sha.starts_with("bad") {
                ScanResult::failure("analyzer failed: exit status: 1")
            } else {
                ScanResult::success("ok")
            }
        }
    }

    fn context(temp: &TempDir) -> OpsContext {
        let mut config = Config::default();
        config.work_dir = temp.path().to_path_buf();
        OpsContext::with_runner(config, Arc::new(PickyRunner)).unwrap()
    }

    const CSV: &str = "repo_url,commit_sha\n\
                       https://github.com/acme/a.git,good1\n\
                       https://github.com/acme/a.git,bad1\n\
                       https://github.com/acme/b.git,good2\n\
                       https://github.com/acme/b.git,\n";

    #[tokio::test]
    async fn test_scan_csv_end_to_end() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.csv");
        std::fs::write(&input, CSV).unwrap();
        let ctx = context(&temp);

        let response = ctx
            .scan(ScanRequest::new(&input), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.summary.succeeded, 2);
        assert_eq!(response.summary.failed, 1);
        assert_eq!(response.summary.invalid, 1);
        assert_eq!(response.stats.processed, 2);
        assert_eq!(response.checkpoint, temp.path().join("scan_checkpoint.json"));
        assert!(response.checkpoint.exists());

        let status = ctx
            .status(StatusRequest {
                include_failed: true,
            })
            .await
            .unwrap();
        assert_eq!(status.failed.len(), 1);
        assert_eq!(status.failed[0].commit_sha, "bad1");
    }

    #[tokio::test]
    async fn test_scan_missing_input() {
        let temp = TempDir::new().unwrap();
        let err = context(&temp)
            .scan(
                ScanRequest::new(temp.path().join("nope.csv")),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::InputNotFound { .. }));
    }

    #[tokio::test]
    async fn test_mark_processed_then_scan_skips() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.csv");
        std::fs::write(&input, CSV).unwrap();
        let ctx = context(&temp);

        ctx.mark_processed(MarkProcessedRequest {
            repository_url: "https://github.com/acme/a.git".into(),
            commit_sha: "bad1".into(),
            project_key: None,
        })
        .await
        .unwrap();

        let response = ctx
            .scan(ScanRequest::new(&input), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.summary.failed, 0);
        assert_eq!(response.summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_merge_checkpoint() {
        let temp = TempDir::new().unwrap();
        let other_dir = TempDir::new().unwrap();
        let other_path = other_dir.path().join("other.json");
        let other = CheckpointStore::load(&other_path, 1);
        other
            .record(
                &WorkItem::new("https://github.com/acme/c.git", "x", None),
                batch_scan_core::ScanStatus::Processed,
                None,
            )
            .await
            .unwrap();

        let ctx = context(&temp);
        let response = ctx
            .merge_checkpoint(MergeCheckpointRequest {
                source: other_path,
            })
            .await
            .unwrap();
        assert_eq!((response.read, response.changed), (1, 1));
        assert_eq!(ctx.repos().await.len(), 1);
    }
}
