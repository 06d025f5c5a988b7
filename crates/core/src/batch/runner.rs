//! Sequential batch processing with per-item failure isolation.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use super::index::{topic_dir, write_index};
use super::note::{slugify, Note};
use crate::acquisition::AcquisitionError;
use crate::audit::{emit_optional, AuditEvent};
use crate::metrics;
use crate::reference::{parse_reference, Reference};
use crate::worker::{Admission, ProcessOutcome, Worker};

/// Longest topic slug used for the index directory.
pub(crate) const TOPIC_SLUG_LEN: usize = 60;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("chat session unavailable: {0}")]
    Connect(#[from] AcquisitionError),
}

/// One reference to process.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub url: String,
    /// Parsed reference; `None` marks an input that could not be parsed.
    pub reference: Option<Reference>,
    pub label: String,
    /// Grouping key for the index.
    pub group: Option<String>,
}

impl BatchEntry {
    /// Entry for a bare URL, parsing it on the spot.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            reference: parse_reference(&url).ok(),
            label: String::new(),
            group: None,
            url,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub topic: String,
    pub entries: Vec<BatchEntry>,
}

impl From<Note> for BatchRequest {
    fn from(note: Note) -> Self {
        Self {
            topic: note.topic,
            entries: note
                .entries
                .into_iter()
                .map(|e| BatchEntry {
                    url: e.url,
                    reference: e.reference,
                    label: e.label,
                    group: e.group,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    pub from_start: bool,
}

/// Outcome of one entry.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub url: String,
    pub label: String,
    pub group: Option<String>,
    pub success: bool,
    pub job_id: Option<String>,
    pub error: Option<String>,
    pub artifact_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub topic: String,
    /// Directory holding the index.
    pub topic_dir: PathBuf,
    /// One item per entry, in submission order.
    pub items: Vec<BatchItem>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Drives a list of references through one shared worker, one at a time.
pub struct BatchCoordinator {
    worker: Arc<Worker>,
}

impl BatchCoordinator {
    pub fn new(worker: Arc<Worker>) -> Self {
        Self { worker }
    }

    pub async fn run(
        &self,
        request: BatchRequest,
        options: BatchOptions,
    ) -> Result<BatchResult, BatchError> {
        let deps = self.worker.deps();
        let started_at = Utc::now();
        let total = request.entries.len();
        let slug = slugify(&request.topic, TOPIC_SLUG_LEN);
        let topic_dir = topic_dir(&deps.config.output_dir, &request.topic);

        info!(topic = %request.topic, total, "Batch started");
        emit_optional(
            deps.audit.as_ref(),
            AuditEvent::BatchStarted {
                topic: request.topic.clone(),
                total,
            },
        )
        .await;

        let needs_chat = request
            .entries
            .iter()
            .any(|e| e.reference.as_ref().is_some_and(Reference::is_chat));
        let chat = if needs_chat { deps.chat.clone() } else { None };
        if let Some(chat) = &chat {
            if let Err(e) = chat.connect().await {
                chat.disconnect().await;
                return Err(BatchError::Connect(e));
            }
        }

        let mut items = Vec::with_capacity(total);
        for (idx, entry) in request.entries.iter().enumerate() {
            deps.progress.notify(
                &slug,
                format!("batch:{}/{}", idx + 1, total),
                Some(entry.url.clone()),
            );
            let item = self.process_entry(entry, options).await;
            let result = if item.success { "succeeded" } else { "failed" };
            metrics::BATCH_ITEMS_TOTAL.with_label_values(&[result]).inc();
            items.push(item);
        }

        if let Some(chat) = &chat {
            chat.disconnect().await;
        }

        let succeeded = items.iter().filter(|i| i.success).count();
        let result = BatchResult {
            topic: request.topic,
            topic_dir,
            items,
            started_at,
            finished_at: Utc::now(),
            total,
            succeeded,
            failed: total - succeeded,
        };

        let index_dir = match write_index(&result).await {
            Ok(()) => Some(result.topic_dir.display().to_string()),
            Err(e) => {
                error!(topic = %result.topic, error = %e, "Failed to write batch index");
                None
            }
        };

        info!(
            topic = %result.topic,
            total = result.total,
            succeeded = result.succeeded,
            failed = result.failed,
            "Batch finished"
        );
        emit_optional(
            deps.audit.as_ref(),
            AuditEvent::BatchCompleted {
                topic: result.topic.clone(),
                total: result.total,
                succeeded: result.succeeded,
                failed: result.failed,
                index_dir,
            },
        )
        .await;

        Ok(result)
    }

    /// Never fails: every problem becomes a failed item.
    async fn process_entry(&self, entry: &BatchEntry, options: BatchOptions) -> BatchItem {
        let mut item = BatchItem {
            url: entry.url.clone(),
            label: entry.label.clone(),
            group: entry.group.clone(),
            success: false,
            job_id: None,
            error: None,
            artifact_dir: None,
        };

        let Some(reference) = &entry.reference else {
            item.error = Some(match parse_reference(&entry.url) {
                Err(e) => format!("invalid reference: {}", e),
                Ok(_) => "invalid reference".to_string(),
            });
            return item;
        };

        let admission = match self.worker.admit(reference, options.from_start).await {
            Ok(admission) => admission,
            Err(e) => {
                warn!(url = %entry.url, error = %e, "Could not admit batch entry");
                item.error = Some(e.to_string());
                return item;
            }
        };
        item.job_id = Some(admission.job().id.clone());

        match admission {
            Admission::AlreadyDone(job) => {
                item.success = true;
                item.artifact_dir =
                    Some(reference.output_dir(job.kind, &self.worker.deps().config.output_dir));
            }
            Admission::InProgress(job) => {
                item.error = Some(format!("already in progress ({})", job.status));
            }
            Admission::Ready(job) => {
                match self
                    .worker
                    .process(&job.id, reference, options.from_start)
                    .await
                {
                    ProcessOutcome::Completed(artifact) => {
                        item.success = true;
                        item.artifact_dir = Some(artifact.output_dir);
                    }
                    outcome => {
                        item.error = outcome.error().map(String::from);
                    }
                }
            }
        }
        item
    }
}
