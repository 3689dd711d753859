//! Background batch runner for service mode.
//!
//! Uploads are queued and run one at a time against the shared checkpoint,
//! so two batches never scan the same item concurrently. Each upload's
//! status follows its job: `queued`, `running`, then `completed` or
//! `error`. An upload still `running` when the service stops is picked up
//! again by [`BatchService::resume_interrupted`] on the next start.

use std::path::PathBuf;

use batch_scan_core::{JobEvent, JobId, UploadStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{OpsError, OpsResult};
use crate::input::InputReader;
use crate::registry::{JobHandle, JobRegistry};
use crate::responses::UploadInfo;
use crate::scheduler::Scheduler;
use crate::uploads::UploadStore;

struct QueuedBatch {
    upload_id: String,
    input: PathBuf,
    handle: JobHandle,
}

/// Queue of batches consumed by a single worker task.
#[derive(Debug, Clone)]
pub struct BatchService {
    registry: JobRegistry,
    uploads: UploadStore,
    queue: mpsc::UnboundedSender<QueuedBatch>,
    stopped: CancellationToken,
}

impl BatchService {
    /// Spawn the registry and the worker on the current runtime.
    ///
    /// Cancelling `cancel` stops the running batch gracefully and ends the
    /// worker.
    pub fn start(scheduler: Scheduler, uploads: UploadStore, cancel: CancellationToken) -> Self {
        let registry = JobRegistry::spawn();
        let (queue, rx) = mpsc::unbounded_channel();
        let stopped = CancellationToken::new();
        tokio::spawn(worker(
            scheduler,
            uploads.clone(),
            rx,
            cancel,
            stopped.clone(),
        ));
        Self {
            registry,
            uploads,
            queue,
            stopped,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Wait until the worker has exited and its last batch is flushed.
    pub async fn stopped(&self) {
        self.stopped.cancelled().await
    }

    /// Queue a stored upload as a new job.
    ///
    /// Fails with [`OpsError::UploadBusy`] while a job for the upload is
    /// queued or running.
    pub async fn submit_upload(&self, upload_id: &str) -> OpsResult<UploadInfo> {
        let (upload, input) = self.uploads.claim(upload_id).await?;
        let job_id = match self
            .registry
            .submit(upload.name.clone(), upload.total_commits)
            .await
        {
            Ok(job_id) => job_id,
            Err(e) => {
                self.uploads
                    .update(&upload.upload_id, UploadStatus::Uploaded, None, None)
                    .await?;
                return Err(e);
            }
        };

        let upload = self
            .uploads
            .update(&upload.upload_id, UploadStatus::Queued, Some(job_id), None)
            .await?;
        self.queue
            .send(QueuedBatch {
                upload_id: upload.upload_id.clone(),
                input,
                handle: self.registry.handle(job_id),
            })
            .map_err(|_| OpsError::ServiceClosed("batch runner"))?;

        info!(upload_id = %upload.upload_id, job_id = %job_id, "Queued upload");
        Ok(upload)
    }

    /// Queue every upload that never ran or whose last job failed, oldest
    /// first.
    pub async fn scan_pending(&self) -> OpsResult<Vec<UploadInfo>> {
        let mut pending: Vec<UploadInfo> = self
            .uploads
            .list()
            .await?
            .into_iter()
            .filter(|u| matches!(u.status, UploadStatus::Uploaded | UploadStatus::Error))
            .collect();
        pending.reverse();

        let mut queued = vec![];
        for upload in pending {
            match self.submit_upload(&upload.upload_id).await {
                Ok(upload) => queued.push(upload),
                // Queued by a concurrent request in the meantime.
                Err(OpsError::UploadBusy { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(queued)
    }

    /// Re-queue uploads a previous process left queued or running.
    pub async fn resume_interrupted(&self) -> OpsResult<Vec<UploadInfo>> {
        let interrupted = self.uploads.reset_interrupted().await?;
        let mut resumed = Vec::with_capacity(interrupted.len());
        for upload in interrupted {
            resumed.push(self.submit_upload(&upload.upload_id).await?);
        }
        if !resumed.is_empty() {
            info!(count = resumed.len(), "Resumed interrupted uploads");
        }
        Ok(resumed)
    }
}

async fn worker(
    scheduler: Scheduler,
    uploads: UploadStore,
    mut rx: mpsc::UnboundedReceiver<QueuedBatch>,
    cancel: CancellationToken,
    stopped: CancellationToken,
) {
    // Signals `stopped()` on every exit path, panics included.
    let _stopped = stopped.drop_guard();
    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(batch) => batch,
                None => break,
            },
        };
        let job_id = batch.handle.job_id();
        info!(job_id = %job_id, input = %batch.input.display(), "Starting batch");
        set_status(&uploads, &batch.upload_id, UploadStatus::Running, job_id, None).await;

        let reader = match InputReader::open(&batch.input) {
            Ok(reader) => reader,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Cannot read batch input");
                batch.handle.report(JobEvent::Started).await;
                batch
                    .handle
                    .report(JobEvent::Finished {
                        error: Some(e.to_string()),
                    })
                    .await;
                set_status(
                    &uploads,
                    &batch.upload_id,
                    UploadStatus::Error,
                    job_id,
                    Some(e.to_string()),
                )
                .await;
                continue;
            }
        };

        // The scheduler reports the outcome to the job, errors included.
        match scheduler
            .run_batch(reader, &cancel, Some(&batch.handle))
            .await
        {
            Ok(summary) if summary.cancelled => {
                // Left `running` so the next start resumes it.
                info!(job_id = %job_id, "Batch interrupted");
            }
            Ok(_) => {
                set_status(&uploads, &batch.upload_id, UploadStatus::Completed, job_id, None)
                    .await;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Batch aborted");
                set_status(
                    &uploads,
                    &batch.upload_id,
                    UploadStatus::Error,
                    job_id,
                    Some(e.to_string()),
                )
                .await;
            }
        }
    }
    info!("Batch runner stopped");
}

async fn set_status(
    uploads: &UploadStore,
    upload_id: &str,
    status: UploadStatus,
    job_id: JobId,
    error: Option<String>,
) {
    if let Err(e) = uploads.update(upload_id, status, Some(job_id), error).await {
        warn!(upload_id, status = %status, error = %e, "Cannot update upload status");
    }
}
