//! Durable job records: one job per unique content reference.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub use store::{CreateJobRequest, JobError, JobFilter, JobStore};
pub use types::{
    Asset, ErrorRecord, Export, ExportKind, Job, JobKind, JobStatus, MediaKind, NewAsset,
    NewErrorRecord, Segment, Summary, Transcript,
};
