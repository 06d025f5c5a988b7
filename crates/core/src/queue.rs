//! Single-slot executor.
//!
//! One background task drains a channel of jobs, so at most one pipeline
//! runs at a time per queue.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::job::{Job, JobError, JobStatus};
use crate::reference::{parse_reference, Reference, ReferenceError};
use crate::worker::{Admission, ProcessOutcome, Worker};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid reference: {0}")]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("queue is shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    Queued,
    AlreadyDone,
    /// Another execution already owns the job.
    Conflict,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub job_id: String,
    pub status: SubmitStatus,
    pub message: String,
}

struct QueuedJob {
    job_id: String,
    reference: Reference,
    from_start: bool,
}

pub struct JobQueue {
    worker: Arc<Worker>,
    tx: mpsc::Sender<QueuedJob>,
    handle: JoinHandle<()>,
    /// Jobs waiting in the channel or running. One entry per job.
    queued: Arc<Mutex<HashSet<String>>>,
}

impl JobQueue {
    /// Spawn the executor task.
    pub fn start(worker: Arc<Worker>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queued = Arc::new(Mutex::new(HashSet::new()));
        let handle = tokio::spawn(run_queue(worker.clone(), rx, queued.clone()));
        Self {
            worker,
            tx,
            handle,
            queued,
        }
    }

    /// Admit `url` and enqueue it unless it is already done or running.
    pub async fn submit(&self, url: &str, from_start: bool) -> Result<SubmitOutcome, QueueError> {
        let reference = parse_reference(url)?;
        let admission = self.worker.admit(&reference, from_start).await?;

        match admission {
            Admission::AlreadyDone(job) => Ok(SubmitOutcome {
                job_id: job.id,
                status: SubmitStatus::AlreadyDone,
                message: "already processed".to_string(),
            }),
            Admission::InProgress(job) => Ok(SubmitOutcome {
                message: format!("already in progress ({})", job.status),
                job_id: job.id,
                status: SubmitStatus::Conflict,
            }),
            Admission::Ready(job) => self.enqueue(job, reference, from_start).await,
        }
    }

    /// Re-run a job that ended in error, or any job with `from_start`.
    pub async fn retry(&self, job_id: &str, from_start: bool) -> Result<SubmitOutcome, QueueError> {
        let store = self.worker.store();
        let job = store
            .get(job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

        let retryable = matches!(job.status, JobStatus::Error | JobStatus::Cancelled);
        if !retryable && !from_start {
            return Err(JobError::InvalidState {
                job_id: job.id,
                current: job.status.to_string(),
                operation: "retry".to_string(),
            }
            .into());
        }

        if self.queued.lock().await.contains(job_id) {
            return Ok(already_queued(job.id));
        }

        let reference = parse_reference(&job.reference)?;
        let job = store.reset_for_retry(job_id)?;
        self.enqueue(job, reference, from_start).await
    }

    /// Stop the job before its next attempt.
    pub fn cancel(&self, job_id: &str) -> Result<Job, QueueError> {
        let store = self.worker.store();
        let job = store
            .get(job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if job.status.is_terminal() && job.status != JobStatus::Error {
            return Err(JobError::InvalidState {
                job_id: job.id,
                current: job.status.to_string(),
                operation: "cancel".to_string(),
            }
            .into());
        }
        let job = store.update_status(job_id, JobStatus::Cancelled, None)?;
        info!(job_id = %job_id, "Job cancelled");
        Ok(job)
    }

    /// Stop accepting work and wait for the queued jobs to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            error!("Queue task failed: {}", e);
        }
    }

    async fn enqueue(
        &self,
        job: Job,
        reference: Reference,
        from_start: bool,
    ) -> Result<SubmitOutcome, QueueError> {
        if !self.queued.lock().await.insert(job.id.clone()) {
            return Ok(already_queued(job.id));
        }

        let sent = self
            .tx
            .send(QueuedJob {
                job_id: job.id.clone(),
                reference,
                from_start,
            })
            .await;
        if sent.is_err() {
            self.queued.lock().await.remove(&job.id);
            return Err(QueueError::Closed);
        }
        self.worker
            .deps()
            .progress
            .notify_status(&job.id, JobStatus::Pending);

        Ok(SubmitOutcome {
            job_id: job.id,
            status: SubmitStatus::Queued,
            message: "queued".to_string(),
        })
    }
}

fn already_queued(job_id: String) -> SubmitOutcome {
    SubmitOutcome {
        job_id,
        status: SubmitStatus::Conflict,
        message: "already queued".to_string(),
    }
}

async fn run_queue(
    worker: Arc<Worker>,
    mut rx: mpsc::Receiver<QueuedJob>,
    queued: Arc<Mutex<HashSet<String>>>,
) {
    info!("Job queue started");

    while let Some(job) = rx.recv().await {
        let job_id = job.job_id.as_str();
        let chat = match &job.reference {
            Reference::Chat(_) => worker.deps().chat.clone(),
            Reference::External(_) => None,
        };

        if let Some(chat) = &chat {
            if let Err(e) = chat.connect().await {
                warn!(job_id = %job_id, error = %e, "Chat session unavailable");
                let message = format!("chat session unavailable: {}", e);
                if let Err(e) =
                    worker
                        .store()
                        .update_status(job_id, JobStatus::Error, Some(&message))
                {
                    error!(job_id = %job_id, error = %e, "Failed to mark job as errored");
                }
                worker
                    .deps()
                    .progress
                    .notify(job_id, JobStatus::Error.as_str(), Some(message));
                chat.disconnect().await;
                queued.lock().await.remove(job_id);
                continue;
            }
        }

        let outcome = worker
            .process(job_id, &job.reference, job.from_start)
            .await;

        if let Some(chat) = &chat {
            chat.disconnect().await;
        }

        match &outcome {
            ProcessOutcome::Completed(artifact) => {
                info!(job_id = %job_id, dir = %artifact.output_dir.display(), "Queued job done");
            }
            ProcessOutcome::Failed { error, .. } => {
                warn!(job_id = %job_id, error = %error, "Queued job failed");
            }
            ProcessOutcome::Cancelled { .. } => {
                info!(job_id = %job_id, "Queued job cancelled");
            }
        }
        queued.lock().await.remove(job_id);
    }

    info!("Job queue stopped");
}
