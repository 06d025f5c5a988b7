//! Job storage trait and request/filter types.

use thiserror::Error;

use super::{
    Asset, ErrorRecord, Export, ExportKind, Job, JobKind, JobStatus, NewAsset, NewErrorRecord,
    Summary, Transcript,
};

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Duplicate(String),

    #[error("Cannot {operation} job {job_id}: {current}")]
    InvalidState {
        job_id: String,
        current: String,
        operation: String,
    },

    #[error("Database error: {0}")]
    Database(String),
}

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    /// Identity key of the reference.
    pub reference: String,
    /// Initial kind: undetermined, or collect/external when known up front.
    pub kind: JobKind,
}

impl CreateJobRequest {
    pub fn new(reference: impl Into<String>, kind: JobKind) -> Self {
        Self {
            reference: reference.into(),
            kind,
        }
    }
}

/// Filter for querying jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
    pub limit: i64,
    pub offset: i64,
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            kind: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Durable job state plus the artifacts each stage produces.
///
/// Implementations must serialize every read and write through a single
/// writer so concurrent callers never break the unique-reference rule.
pub trait JobStore: Send + Sync {
    /// Create a job. Fails with [`JobError::Duplicate`] if the reference exists.
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobError>;

    /// Return the job for the reference, creating it if missing.
    /// The flag is true when this call created the row.
    fn get_or_create(&self, request: CreateJobRequest) -> Result<(Job, bool), JobError>;

    fn get(&self, id: &str) -> Result<Option<Job>, JobError>;

    fn get_by_reference(&self, reference: &str) -> Result<Option<Job>, JobError>;

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError>;

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError>;

    /// Move to `status`. `last_error` is only written when provided.
    fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<Job, JobError>;

    /// Like [`JobStore::update_status`], but a cancelled job keeps its status.
    /// Returns `None` when the job was cancelled.
    fn advance_status(
        &self,
        id: &str,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<Option<Job>, JobError>;

    /// Persist a classification result. Collect and external kinds are immutable.
    fn set_kind(&self, id: &str, kind: JobKind) -> Result<Job, JobError>;

    fn increment_retry(&self, id: &str) -> Result<Job, JobError>;

    /// Back to pending with a zero retry counter and no last error.
    fn reset_for_retry(&self, id: &str) -> Result<Job, JobError>;

    /// Retires any live asset of the job before inserting the new one.
    fn save_asset(&self, asset: NewAsset) -> Result<Asset, JobError>;

    /// Latest asset that has not been marked deleted.
    fn get_asset(&self, job_id: &str) -> Result<Option<Asset>, JobError>;

    fn mark_asset_deleted(&self, job_id: &str) -> Result<(), JobError>;

    /// Store the transcript. A second call for the same job is a [`JobError::Duplicate`].
    fn save_transcript(&self, transcript: &Transcript) -> Result<(), JobError>;

    fn get_transcript(&self, job_id: &str) -> Result<Option<Transcript>, JobError>;

    fn save_summary(&self, summary: &Summary) -> Result<(), JobError>;

    fn get_summary(&self, job_id: &str) -> Result<Option<Summary>, JobError>;

    /// Record an export, replacing any earlier row of the same kind.
    fn save_export(
        &self,
        job_id: &str,
        kind: ExportKind,
        path: &std::path::Path,
        size_bytes: u64,
    ) -> Result<Export, JobError>;

    fn get_export(&self, job_id: &str, kind: ExportKind) -> Result<Option<Export>, JobError>;

    fn list_exports(&self, job_id: &str) -> Result<Vec<Export>, JobError>;

    /// Append to the error trail.
    fn record_error(&self, record: NewErrorRecord) -> Result<ErrorRecord, JobError>;

    fn list_errors(&self, job_id: &str) -> Result<Vec<ErrorRecord>, JobError>;

    /// Drop transcript, summary and export rows and retire the asset.
    fn clear_artifacts(&self, job_id: &str) -> Result<(), JobError>;
}
