//! In-memory job registry for service mode.
//!
//! One actor task owns every [`Job`]; handles talk to it over a channel, so
//! job state needs no lock and updates are applied in the order they were
//! sent. State is lost on restart.

use std::collections::HashMap;

use batch_scan_core::{Job, JobEvent, JobId};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{OpsError, OpsResult};

const CHANNEL_CAPACITY: usize = 256;

enum Command {
    Submit {
        job: Job,
        reply: oneshot::Sender<JobId>,
    },
    Update {
        job_id: JobId,
        event: JobEvent,
    },
    Get {
        job_id: JobId,
        reply: oneshot::Sender<Option<Job>>,
    },
    List {
        reply: oneshot::Sender<Vec<Job>>,
    },
}

/// Cloneable handle to the registry actor.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    tx: mpsc::Sender<Command>,
}

impl JobRegistry {
    /// Start the actor on the current runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(run(rx));
        Self { tx }
    }

    /// Register a queued job over `total` input rows.
    pub async fn submit(&self, source: impl Into<String>, total: usize) -> OpsResult<JobId> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            job: Job::new(source, total),
            reply,
        })
        .await?;
        rx.await.map_err(|_| closed())
    }

    pub async fn status(&self, job_id: JobId) -> OpsResult<Job> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get { job_id, reply }).await?;
        rx.await.map_err(|_| closed())?.ok_or(OpsError::JobNotFound {
            id: job_id.to_string(),
        })
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> OpsResult<Vec<Job>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::List { reply }).await?;
        rx.await.map_err(|_| closed())
    }

    /// Progress handle for one job.
    pub fn handle(&self, job_id: JobId) -> JobHandle {
        JobHandle {
            job_id,
            tx: self.tx.clone(),
        }
    }

    async fn send(&self, command: Command) -> OpsResult<()> {
        self.tx.send(command).await.map_err(|_| closed())
    }
}

/// Reports progress events for a single job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    job_id: JobId,
    tx: mpsc::Sender<Command>,
}

impl JobHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Send an event. Lost silently if the registry is gone.
    pub async fn report(&self, event: JobEvent) {
        let _ = self
            .tx
            .send(Command::Update {
                job_id: self.job_id,
                event,
            })
            .await;
    }
}

fn closed() -> OpsError {
    OpsError::ServiceClosed("job registry")
}

async fn run(mut rx: mpsc::Receiver<Command>) {
    let mut jobs: HashMap<JobId, Job> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Submit { job, reply } => {
                let job_id = job.job_id;
                debug!(job_id = %job_id, source = %job.source, "Job queued");
                jobs.insert(job_id, job);
                let _ = reply.send(job_id);
            }
            Command::Update { job_id, event } => {
                if let Some(job) = jobs.get_mut(&job_id) {
                    job.apply(event);
                }
            }
            Command::Get { job_id, reply } => {
                let _ = reply.send(jobs.get(&job_id).cloned());
            }
            Command::List { reply } => {
                let mut all: Vec<Job> = jobs.values().cloned().collect();
                all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                let _ = reply.send(all);
            }
        }
    }
}
