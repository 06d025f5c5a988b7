//! Shared harness for the lifecycle tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use gleaner_core::audit::{create_audit_system, AuditFilter, AuditRecord, AuditStore, SqliteAuditStore};
use gleaner_core::config::{ChatKindPolicy, PipelineConfig};
use gleaner_core::job::{Job, JobKind, JobStore, SqliteJobStore};
use gleaner_core::pipeline::PipelineDeps;
use gleaner_core::reference::{parse_reference, Reference};
use gleaner_core::testing::{MockChatSource, MockExternalSource, MockSummarizer, MockTranscriber};
use gleaner_core::worker::Worker;

/// A worker wired to mocks, an on-disk store and a temp output tree.
pub struct TestHarness {
    pub worker: Arc<Worker>,
    pub store: Arc<SqliteJobStore>,
    pub audit: Arc<SqliteAuditStore>,
    pub chat: Arc<MockChatSource>,
    pub external: Arc<MockExternalSource>,
    pub transcriber: Arc<MockTranscriber>,
    pub summarizer: Arc<MockSummarizer>,
    pub root: TempDir,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_config(|c| c).await
    }

    pub async fn classifying() -> Self {
        Self::with_config(|c| c.with_chat_kind(ChatKindPolicy::Classify)).await
    }

    pub async fn with_config(configure: impl FnOnce(PipelineConfig) -> PipelineConfig) -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        let config = configure(
            PipelineConfig::rooted_at(root.path())
                .with_max_attempts(3)
                .with_retry_backoff_secs(0.0),
        );

        let store = Arc::new(
            SqliteJobStore::new(&root.path().join("jobs.db")).expect("Failed to create job store"),
        );
        let audit = Arc::new(SqliteAuditStore::in_memory().expect("Failed to create audit store"));
        let (handle, writer) = create_audit_system(audit.clone(), 256);
        tokio::spawn(writer.run());

        let chat = Arc::new(MockChatSource::new());
        let external = Arc::new(MockExternalSource::new());
        let transcriber = Arc::new(MockTranscriber::new());
        let summarizer = Arc::new(MockSummarizer::new());

        let deps = PipelineDeps::new(store.clone(), transcriber.clone(), config)
            .with_chat(chat.clone())
            .with_external(external.clone())
            .with_summarizer(summarizer.clone(), "en")
            .with_audit(handle);

        Self {
            worker: Arc::new(Worker::new(deps)),
            store,
            audit,
            chat,
            external,
            transcriber,
            summarizer,
            root,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.worker.deps().config.output_dir
    }

    pub fn job_dir(&self, reference: &Reference, kind: JobKind) -> PathBuf {
        reference.output_dir(kind, self.output_dir())
    }

    pub fn job(&self, id: &str) -> Job {
        self.store
            .get(id)
            .expect("store read failed")
            .expect("job missing")
    }

    /// Admit `url` and return its reference and job id.
    pub async fn admit(&self, url: &str) -> (Reference, String) {
        let reference = parse_reference(url).expect("bad test url");
        let admission = self
            .worker
            .admit(&reference, false)
            .await
            .expect("admit failed");
        (reference, admission.job().id.clone())
    }

    /// Audit records for `job_id`, oldest first, once the writer has caught up.
    pub async fn audit_for(&self, job_id: &str) -> Vec<AuditRecord> {
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let mut records = self
            .audit
            .query(&AuditFilter::new().with_job_id(job_id).with_limit(1000))
            .expect("audit query failed");
        records.reverse();
        records
    }
}
