//! Stage pipelines, one per job kind.
//!
//! Every pipeline follows the same resume algorithm:
//! - derive the job directory from the reference
//! - short-circuit on a verified completion marker
//! - otherwise run the stages in order, skipping any whose output is already present
//! - write the marker last

mod collect;
mod error;
mod external;
pub mod files;
mod ingest;
mod manifest;
mod media;
mod render;
mod tracker;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::acquisition::{ChatSource, ExternalSource};
use crate::audit::AuditHandle;
use crate::config::PipelineConfig;
use crate::job::{Export, Job, JobKind, JobStore};
use crate::progress::ProgressNotifier;
use crate::reference::Reference;
use crate::summarize::Summarizer;
use crate::transcribe::Transcriber;

pub use collect::CollectPipeline;
pub use error::{AttemptOutcome, PipelineError, Stage, TerminalError};
pub use external::ExternalPipeline;
pub use ingest::IngestPipeline;
pub use manifest::{Manifest, ManifestArtifact, MarkerState, MANIFEST_FILE};
pub use media::MediaPipeline;
pub use render::{render_summary_doc, render_transcript_doc};

/// Collaborators shared by every pipeline and the worker.
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<dyn JobStore>,
    pub chat: Option<Arc<dyn ChatSource>>,
    pub external: Option<Arc<dyn ExternalSource>>,
    pub transcriber: Arc<dyn Transcriber>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub config: PipelineConfig,
    /// Language summaries are written in.
    pub summary_language: String,
    pub progress: ProgressNotifier,
    pub audit: Option<AuditHandle>,
}

impl PipelineDeps {
    pub fn new(
        store: Arc<dyn JobStore>,
        transcriber: Arc<dyn Transcriber>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            chat: None,
            external: None,
            transcriber,
            summarizer: None,
            config,
            summary_language: "en".to_string(),
            progress: ProgressNotifier::default(),
            audit: None,
        }
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatSource>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_external(mut self, external: Arc<dyn ExternalSource>) -> Self {
        self.external = Some(external);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>, language: &str) -> Self {
        self.summarizer = Some(summarizer);
        self.summary_language = language.to_string();
        self
    }

    pub fn with_progress(mut self, progress: ProgressNotifier) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Chat backend, or a terminal error when none is configured.
    pub(crate) fn chat(&self) -> Result<&Arc<dyn ChatSource>, PipelineError> {
        self.chat.as_ref().ok_or_else(|| {
            TerminalError::Unsupported("no chat backend is configured".to_string()).at(Stage::Fetch)
        })
    }

    pub(crate) fn external(&self) -> Result<&Arc<dyn ExternalSource>, PipelineError> {
        self.external.as_ref().ok_or_else(|| {
            TerminalError::Unsupported("no external video backend is configured".to_string())
                .at(Stage::Fetch)
        })
    }
}

/// Input of one pipeline run.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job: Job,
    pub reference: Reference,
    /// Discard earlier artifacts and the marker before running.
    pub from_start: bool,
}

/// What a successful run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactResult {
    pub job_id: String,
    pub kind: JobKind,
    pub output_dir: PathBuf,
    pub exports: Vec<Export>,
    /// True when the run short-circuited on an existing marker.
    pub cached: bool,
}

/// A fixed, ordered sequence of idempotent stages for one job kind.
#[async_trait]
pub trait StagePipeline: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn run(&self, ctx: &JobContext) -> Result<ArtifactResult, PipelineError>;
}

/// The closed set of pipelines, selected by job kind.
pub struct Pipelines {
    media: MediaPipeline,
    ingest: IngestPipeline,
    collect: CollectPipeline,
    external: ExternalPipeline,
}

impl Pipelines {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            media: MediaPipeline::new(deps.clone()),
            ingest: IngestPipeline::new(deps.clone()),
            collect: CollectPipeline::new(deps.clone()),
            external: ExternalPipeline::new(deps),
        }
    }

    /// `None` for [`JobKind::Undetermined`].
    pub fn for_kind(&self, kind: JobKind) -> Option<&dyn StagePipeline> {
        match kind {
            JobKind::Media => Some(&self.media),
            JobKind::Ingest => Some(&self.ingest),
            JobKind::Collect => Some(&self.collect),
            JobKind::External => Some(&self.external),
            JobKind::Undetermined => None,
        }
    }
}
