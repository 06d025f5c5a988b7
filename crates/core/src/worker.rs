//! Retry coordinator.
//!
//! Owns one job's execution: classification, dispatch to the matching stage
//! pipeline, and a bounded retry loop with exponential backoff. Terminal
//! failures stop after a single attempt.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::audit::{emit_optional, AuditEvent};
use crate::classifier::Classifier;
use crate::job::{CreateJobRequest, Job, JobError, JobFilter, JobStatus, JobStore, NewErrorRecord};
use crate::metrics;
use crate::pipeline::{
    ArtifactResult, AttemptOutcome, JobContext, Manifest, MarkerState, PipelineDeps,
    PipelineError, Pipelines, Stage,
};
use crate::reference::Reference;

/// Final result of [`Worker::process`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Completed(ArtifactResult),
    Failed {
        job_id: String,
        error: String,
        attempts: u32,
        retryable: bool,
    },
    /// The job was cancelled before the next attempt started.
    Cancelled { job_id: String },
}

impl ProcessOutcome {
    pub fn artifact(&self) -> Option<&ArtifactResult> {
        match self {
            ProcessOutcome::Completed(artifact) => Some(artifact),
            _ => None,
        }
    }

    pub fn into_artifact(self) -> Option<ArtifactResult> {
        match self {
            ProcessOutcome::Completed(artifact) => Some(artifact),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProcessOutcome::Completed(_) => None,
            ProcessOutcome::Failed { error, .. } => Some(error),
            ProcessOutcome::Cancelled { .. } => Some("cancelled"),
        }
    }
}

/// Result of checking a reference against the store before processing.
#[derive(Debug, Clone)]
pub enum Admission {
    /// Already done; nothing to run.
    AlreadyDone(Job),
    /// Another execution owns it right now.
    InProgress(Job),
    /// Pending and ready to process.
    Ready(Job),
}

impl Admission {
    pub fn job(&self) -> &Job {
        match self {
            Admission::AlreadyDone(job) | Admission::InProgress(job) | Admission::Ready(job) => job,
        }
    }
}

pub struct Worker {
    deps: PipelineDeps,
    classifier: Classifier,
    pipelines: Pipelines,
}

impl Worker {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            classifier: Classifier::new(deps.store.clone(), deps.chat.clone()),
            pipelines: Pipelines::new(deps.clone()),
            deps,
        }
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.deps.store
    }

    /// Find or create the job for `reference` and apply the idempotency rules.
    ///
    /// Errored or cancelled jobs are reset to pending. So are done jobs when
    /// `from_start` is set or their artifacts no longer verify.
    pub async fn admit(&self, reference: &Reference, from_start: bool) -> Result<Admission, JobError> {
        let request = CreateJobRequest::new(
            reference.identity_key(),
            reference.initial_kind(self.deps.config.chat_kind),
        );
        let (job, created) = self.deps.store.get_or_create(request)?;

        if created {
            info!(job_id = %job.id, reference = %job.reference, kind = %job.kind, "Job created");
            emit_optional(
                self.deps.audit.as_ref(),
                AuditEvent::JobCreated {
                    job_id: job.id.clone(),
                    reference: job.reference.clone(),
                    kind: job.kind.to_string(),
                },
            )
            .await;
        }

        let reuse_done =
            job.status == JobStatus::Done && !from_start && self.artifacts_intact(&job, reference).await;
        let admission = match job.status {
            status if status.is_in_progress() => Admission::InProgress(job),
            JobStatus::Done if reuse_done => Admission::AlreadyDone(job),
            JobStatus::Pending => Admission::Ready(job),
            JobStatus::Done | JobStatus::Error | JobStatus::Cancelled => {
                let job = self.deps.store.reset_for_retry(&job.id)?;
                Admission::Ready(job)
            }
            _ => Admission::Ready(job),
        };
        Ok(admission)
    }

    /// A done job only counts as done while its completion marker still verifies.
    async fn artifacts_intact(&self, job: &Job, reference: &Reference) -> bool {
        let dir = reference.output_dir(job.kind, &self.deps.config.output_dir);
        match Manifest::check(&dir).await {
            MarkerState::Valid(_) => true,
            MarkerState::Absent | MarkerState::Invalid(_) => {
                warn!(job_id = %job.id, dir = %dir.display(), "Done job has missing artifacts, reprocessing");
                false
            }
        }
    }

    /// Reset jobs left in an in-progress status by a previous process.
    ///
    /// Only safe while no worker is running.
    pub fn recover_interrupted(&self) -> Result<usize, JobError> {
        let jobs = self.deps.store.list(&JobFilter::new().with_limit(10_000))?;
        let mut recovered = 0;
        for job in jobs.into_iter().filter(|j| j.status.is_in_progress()) {
            warn!(job_id = %job.id, status = %job.status, "Recovering interrupted job");
            self.deps
                .store
                .update_status(&job.id, JobStatus::Pending, None)?;
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Run a job to completion or failure.
    pub async fn process(&self, job_id: &str, reference: &Reference, from_start: bool) -> ProcessOutcome {
        metrics::JOBS_ACTIVE.inc();
        let outcome = self.run_attempts(job_id, reference, from_start).await;
        metrics::JOBS_ACTIVE.dec();

        let result = match &outcome {
            ProcessOutcome::Completed(a) if a.cached => "cached",
            ProcessOutcome::Completed(_) => "done",
            ProcessOutcome::Failed { .. } => "error",
            ProcessOutcome::Cancelled { .. } => "cancelled",
        };
        metrics::JOBS_TOTAL.with_label_values(&[result]).inc();
        outcome
    }

    async fn run_attempts(&self, job_id: &str, reference: &Reference, from_start: bool) -> ProcessOutcome {
        let store = &self.deps.store;
        let max_attempts = self.deps.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let job = match store.get(job_id) {
                Ok(Some(job)) => job,
                Ok(None) => {
                    return self.fail(job_id, format!("job {} not found", job_id), attempt, false);
                }
                Err(e) => {
                    return self.fail(job_id, e.to_string(), attempt, true);
                }
            };

            match job.status {
                JobStatus::Cancelled => return self.cancelled(job_id, attempt),
                JobStatus::Error if attempt == 1 => {
                    warn!(job_id = %job_id, "Job is in error, it must be re-admitted before it runs again");
                    return self.fail(
                        job_id,
                        job.last_error.unwrap_or_else(|| "job is in error".to_string()),
                        0,
                        false,
                    );
                }
                _ => {}
            }

            debug!(job_id = %job_id, attempt, max_attempts, "Starting attempt");
            let outcome: AttemptOutcome = self
                .attempt(job, reference, from_start && attempt == 1)
                .await
                .into();

            match outcome {
                AttemptOutcome::Success(artifact) => {
                    metrics::ATTEMPTS_TOTAL.with_label_values(&["success"]).inc();
                    return ProcessOutcome::Completed(artifact);
                }
                AttemptOutcome::Cancelled => return self.cancelled(job_id, attempt),
                AttemptOutcome::NonRetryable { stage, error: err } => {
                    metrics::ATTEMPTS_TOTAL
                        .with_label_values(&["non_retryable"])
                        .inc();
                    let message = err.to_string();
                    self.record_failure(job_id, attempt, stage, err.error_type(), &message, false)
                        .await;
                    if self.is_cancelled(job_id) {
                        return self.cancelled(job_id, attempt);
                    }
                    warn!(job_id = %job_id, stage = %stage, error = %message, "Terminal failure, not retrying");
                    return self.finish_failed(job_id, message, attempt, false).await;
                }
                AttemptOutcome::Retryable { stage, message } => {
                    metrics::ATTEMPTS_TOTAL.with_label_values(&["retryable"]).inc();
                    let error_type = if stage == Stage::Unknown { "unexpected" } else { "stage" };
                    self.record_failure(job_id, attempt, stage, error_type, &message, true)
                        .await;
                    if let Err(e) = store.increment_retry(job_id) {
                        error!(job_id = %job_id, error = %e, "Failed to increment retry count");
                    }
                    last_error = message;
                    if self.is_cancelled(job_id) {
                        return self.cancelled(job_id, attempt);
                    }

                    if attempt < max_attempts {
                        match store.advance_status(job_id, JobStatus::Pending, Some(&last_error)) {
                            Ok(Some(_)) => {}
                            Ok(None) => return self.cancelled(job_id, attempt),
                            Err(e) => {
                                error!(job_id = %job_id, error = %e, "Failed to record last error")
                            }
                        }
                        let wait = self.deps.config.backoff_for(attempt);
                        warn!(
                            job_id = %job_id,
                            stage = %stage,
                            attempt,
                            max_attempts,
                            wait_secs = wait.as_secs_f64(),
                            error = %last_error,
                            "Attempt failed, retrying"
                        );
                        self.deps.progress.notify(
                            job_id,
                            "retrying",
                            Some(format!("attempt {}/{}", attempt + 1, max_attempts)),
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        error!(job_id = %job_id, attempts = max_attempts, error = %last_error, "Attempts exhausted");
        self.finish_failed(job_id, last_error, max_attempts, true).await
    }

    fn is_cancelled(&self, job_id: &str) -> bool {
        matches!(
            self.deps.store.get(job_id),
            Ok(Some(job)) if job.status == JobStatus::Cancelled
        )
    }

    fn cancelled(&self, job_id: &str, attempt: u32) -> ProcessOutcome {
        info!(job_id = %job_id, attempt, "Job cancelled, not starting another attempt");
        self.deps.progress.notify_status(job_id, JobStatus::Cancelled);
        ProcessOutcome::Cancelled {
            job_id: job_id.to_string(),
        }
    }

    async fn attempt(
        &self,
        job: Job,
        reference: &Reference,
        from_start: bool,
    ) -> Result<ArtifactResult, PipelineError> {
        let kind = self.classifier.resolve(&job, reference).await?;
        let pipeline = self.pipelines.for_kind(kind).ok_or_else(|| {
            PipelineError::Unexpected(format!("no pipeline for kind {}", kind))
        })?;

        let ctx = JobContext {
            job: Job { kind, ..job },
            reference: reference.clone(),
            from_start,
        };
        pipeline.run(&ctx).await
    }

    /// Append to the durable error trail before the retry decision is made.
    async fn record_failure(
        &self,
        job_id: &str,
        attempt: u32,
        stage: Stage,
        error_type: &str,
        message: &str,
        retryable: bool,
    ) {
        let record = NewErrorRecord {
            job_id: job_id.to_string(),
            stage: stage.to_string(),
            error_type: error_type.to_string(),
            message: message.to_string(),
            detail: Some(format!(
                "attempt {}/{}",
                attempt, self.deps.config.max_attempts
            )),
        };
        if let Err(e) = self.deps.store.record_error(record) {
            error!(job_id = %job_id, error = %e, "Failed to record error");
        }

        emit_optional(
            self.deps.audit.as_ref(),
            AuditEvent::AttemptFailed {
                job_id: job_id.to_string(),
                attempt,
                stage: stage.to_string(),
                error_type: error_type.to_string(),
                message: message.to_string(),
                retryable,
            },
        )
        .await;
    }

    async fn finish_failed(
        &self,
        job_id: &str,
        message: String,
        attempts: u32,
        retryable: bool,
    ) -> ProcessOutcome {
        let from = self
            .deps
            .store
            .get(job_id)
            .ok()
            .flatten()
            .map(|j| j.status.to_string())
            .unwrap_or_default();
        if let Err(e) = self
            .deps
            .store
            .update_status(job_id, JobStatus::Error, Some(&message))
        {
            error!(job_id = %job_id, error = %e, "Failed to mark job as errored");
        }
        self.deps
            .progress
            .notify(job_id, JobStatus::Error.as_str(), Some(message.clone()));
        emit_optional(
            self.deps.audit.as_ref(),
            AuditEvent::JobStatusChanged {
                job_id: job_id.to_string(),
                from_status: from,
                to_status: JobStatus::Error.to_string(),
                reason: Some(message.clone()),
            },
        )
        .await;

        self.fail(job_id, message, attempts, retryable)
    }

    fn fail(&self, job_id: &str, error: String, attempts: u32, retryable: bool) -> ProcessOutcome {
        ProcessOutcome::Failed {
            job_id: job_id.to_string(),
            error,
            attempts,
            retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::job::{JobKind, SqliteJobStore};
    use crate::reference::parse_reference;
    use crate::testing::MockTranscriber;
    use tempfile::TempDir;

    fn worker(dir: &TempDir) -> Worker {
        let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::in_memory().unwrap());
        let config = PipelineConfig::rooted_at(dir.path()).with_retry_backoff_secs(0.0);
        Worker::new(PipelineDeps::new(
            store,
            Arc::new(MockTranscriber::new()),
            config,
        ))
    }

    #[tokio::test]
    async fn test_admit_rules() {
        let dir = TempDir::new().unwrap();
        let worker = worker(&dir);
        let reference = parse_reference("https://youtu.be/abc123").unwrap();

        let admission = worker.admit(&reference, false).await.unwrap();
        let job = admission.job().clone();
        assert!(matches!(admission, Admission::Ready(_)));
        assert_eq!(job.kind, JobKind::External);

        worker
            .store()
            .update_status(&job.id, JobStatus::Downloading, None)
            .unwrap();
        assert!(matches!(
            worker.admit(&reference, false).await.unwrap(),
            Admission::InProgress(_)
        ));

        worker
            .store()
            .update_status(&job.id, JobStatus::Done, None)
            .unwrap();
        // Done without a marker on disk is reprocessed.
        assert!(matches!(
            worker.admit(&reference, false).await.unwrap(),
            Admission::Ready(_)
        ));

        let out = reference.output_dir(JobKind::External, &worker.deps().config.output_dir);
        Manifest::new(JobKind::External, None)
            .write_atomic(&out)
            .await
            .unwrap();
        worker
            .store()
            .update_status(&job.id, JobStatus::Done, None)
            .unwrap();
        assert!(matches!(
            worker.admit(&reference, false).await.unwrap(),
            Admission::AlreadyDone(_)
        ));
        assert!(matches!(
            worker.admit(&reference, true).await.unwrap(),
            Admission::Ready(_)
        ));

        worker
            .store()
            .update_status(&job.id, JobStatus::Error, Some("boom"))
            .unwrap();
        match worker.admit(&reference, false).await.unwrap() {
            Admission::Ready(job) => {
                assert_eq!(job.status, JobStatus::Pending);
                assert!(job.last_error.is_none());
            }
            other => panic!("unexpected admission: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let dir = TempDir::new().unwrap();
        let worker = worker(&dir);
        let reference = parse_reference("https://youtu.be/abc123").unwrap();
        let job = worker.admit(&reference, false).await.unwrap().job().clone();
        worker
            .store()
            .update_status(&job.id, JobStatus::Transcribing, None)
            .unwrap();

        assert_eq!(worker.recover_interrupted().unwrap(), 1);
        let job = worker.store().get(&job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_missing_backend_is_terminal() {
        let dir = TempDir::new().unwrap();
        let worker = worker(&dir);
        let reference = parse_reference("https://youtu.be/abc123").unwrap();
        let job = worker.admit(&reference, false).await.unwrap().job().clone();

        let outcome = worker.process(&job.id, &reference, false).await;
        match outcome {
            ProcessOutcome::Failed {
                attempts,
                retryable,
                ..
            } => {
                assert_eq!(attempts, 1);
                assert!(!retryable);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        let errors = worker.store().list_errors(&job.id).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, "unsupported");
        assert_eq!(errors[0].stage, "fetch");
    }
}
