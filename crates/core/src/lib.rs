pub mod acquisition;
pub mod audit;
pub mod batch;
pub mod classifier;
pub mod cleanup;
pub mod config;
pub mod job;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod reference;
pub mod summarize;
pub mod testing;
pub mod transcribe;
pub mod worker;

pub use acquisition::{AcquisitionError, ChatSource, ExternalSource, YtDlpSource};
pub use audit::{create_audit_system, AuditEvent, AuditHandle, SqliteAuditStore};
pub use batch::{parse_note, BatchCoordinator, BatchOptions, BatchRequest, BatchResult};
pub use classifier::{classify, Classifier};
pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use job::{Job, JobKind, JobStatus, JobStore, SqliteJobStore};
pub use pipeline::{ArtifactResult, PipelineDeps, PipelineError, Stage, TerminalError};
pub use progress::{ProgressEvent, ProgressNotifier};
pub use queue::{JobQueue, QueueError, SubmitOutcome, SubmitStatus};
pub use reference::{parse_reference, Reference, ReferenceError};
pub use summarize::{AnthropicSummarizer, Summarizer};
pub use transcribe::{Transcriber, WhisperCliTranscriber};
pub use worker::{Admission, ProcessOutcome, Worker};
