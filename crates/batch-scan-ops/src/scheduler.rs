//! Bounded worker pool that drives a batch through the executor.
//!
//! One pool of at most `concurrency` executors serves the whole run. Input is
//! read `batch_size` rows at a time, and the next chunk is read as soon as
//! the buffered one is dispatched, so chunk boundaries never idle workers.
//!
//! Each outcome is recorded in the checkpoint before it is counted. Records
//! reach disk every `flush_every` outcomes, so per-item job progress may run
//! ahead of the file; the checkpoint is always flushed before the batch
//! summary is returned or `Finished` is reported.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use batch_scan_core::{
    BatchSummary, JobEvent, ScanOutcome, ScanResult, ScanStatus, WorkItem, WorkItemId,
};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{OpsError, OpsResult};
use crate::executor::ScanRunner;
use crate::input::WorkSource;
use crate::registry::JobHandle;

/// Runs batches against a shared checkpoint.
#[derive(Clone)]
pub struct Scheduler {
    runner: Arc<dyn ScanRunner>,
    store: Arc<CheckpointStore>,
    concurrency: usize,
    batch_size: usize,
}

/// Bookkeeping for one run.
struct RunState<'a> {
    summary: BatchSummary,
    in_flight: HashMap<Id, WorkItem>,
    fatal: Option<OpsError>,
    progress: Option<&'a JobHandle>,
}

impl RunState<'_> {
    async fn report(&self, event: JobEvent) {
        if let Some(handle) = self.progress {
            handle.report(event).await;
        }
    }
}

impl Scheduler {
    pub fn new(
        runner: Arc<dyn ScanRunner>,
        store: Arc<CheckpointStore>,
        concurrency: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            runner,
            store,
            concurrency: concurrency.max(1),
            batch_size: batch_size.max(1),
        }
    }

    /// Process every item of `source` not yet processed.
    ///
    /// Per-item failures are recorded and counted. The only error returned is
    /// a checkpoint that cannot be written (or unreadable input); in that
    /// case dispatch stops and in-flight items drain first.
    pub async fn run_batch(
        &self,
        mut source: impl WorkSource,
        cancel: &CancellationToken,
        progress: Option<&JobHandle>,
    ) -> OpsResult<BatchSummary> {
        let mut state = RunState {
            summary: BatchSummary::default(),
            in_flight: HashMap::new(),
            fatal: None,
            progress,
        };
        state.report(JobEvent::Started).await;

        let mut tasks: JoinSet<ScanResult> = JoinSet::new();
        let mut buffer: VecDeque<WorkItem> = VecDeque::new();
        // Every identity dispatched this run, so duplicates never run twice.
        let mut attempted: HashSet<WorkItemId> = HashSet::new();
        let mut exhausted = false;

        loop {
            if state.fatal.is_some() {
                break;
            }
            if cancel.is_cancelled() {
                state.summary.cancelled = true;
                break;
            }

            if tasks.len() < self.concurrency {
                if let Some(item) = buffer.pop_front() {
                    self.dispatch(&mut state, &mut tasks, &mut attempted, item)
                        .await;
                    continue;
                }
                if !exhausted {
                    match source.next_chunk(self.batch_size) {
                        Ok(Some(chunk)) => {
                            state.summary.invalid += chunk.invalid;
                            buffer.extend(chunk.items);
                        }
                        Ok(None) => exhausted = true,
                        Err(e) => state.fatal = Some(e),
                    }
                    continue;
                }
            }

            if tasks.is_empty() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    state.summary.cancelled = true;
                    break;
                }
                Some(joined) = tasks.join_next_with_id() => {
                    self.complete(&mut state, joined).await;
                }
            }
        }

        // Drain: in-flight items always finish and get recorded.
        while let Some(joined) = tasks.join_next_with_id().await {
            self.complete(&mut state, joined).await;
        }

        if let Err(e) = self.store.flush().await {
            state.fatal.get_or_insert(e);
        }

        if let Some(err) = state.fatal.take() {
            error!(error = %err, "Batch aborted");
            state
                .report(JobEvent::Finished {
                    error: Some(err.to_string()),
                })
                .await;
            return Err(err);
        }

        let summary = state.summary.clone();
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            invalid = summary.invalid,
            cancelled = summary.cancelled,
            "Batch finished"
        );
        state.report(JobEvent::Finished { error: None }).await;
        Ok(summary)
    }

    /// Skip `item` if it already ran this run or is processed; otherwise spawn it.
    async fn dispatch(
        &self,
        state: &mut RunState<'_>,
        tasks: &mut JoinSet<ScanResult>,
        attempted: &mut HashSet<WorkItemId>,
        item: WorkItem,
    ) {
        let id = item.id();
        if !attempted.insert(id.clone()) || self.store.is_processed(&id).await {
            state.summary.skipped += 1;
            state.report(JobEvent::ItemSkipped).await;
            return;
        }

        state.report(JobEvent::ItemStarted).await;
        let runner = Arc::clone(&self.runner);
        let task_item = item.clone();
        let handle = tasks.spawn(async move { runner.run(&task_item).await });
        state.in_flight.insert(handle.id(), item);
    }

    /// Record a finished task, then count it.
    async fn complete(&self, state: &mut RunState<'_>, joined: Result<(Id, ScanResult), JoinError>) {
        let (task_id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(e) => {
                warn!(error = %e, "Executor task did not complete");
                (e.id(), ScanResult::failure(format!("executor crashed: {}", e)))
            }
        };
        let Some(item) = state.in_flight.remove(&task_id) else {
            return;
        };

        let (status, error, outcome) = if result.is_success() {
            (ScanStatus::Processed, None, ScanOutcome::Success)
        } else {
            (ScanStatus::Failed, Some(result.detail), ScanOutcome::Failure)
        };

        if let Err(e) = self.store.record(&item, status, error).await {
            error!(
                repo = %item.repository_url,
                commit = %item.commit_sha,
                error = %e,
                "Cannot persist checkpoint, stopping dispatch"
            );
            state.fatal.get_or_insert(e);
            return;
        }

        match outcome {
            ScanOutcome::Success => state.summary.succeeded += 1,
            ScanOutcome::Failure => state.summary.failed += 1,
        }
        state.report(JobEvent::ItemFinished(outcome)).await;
    }
}
