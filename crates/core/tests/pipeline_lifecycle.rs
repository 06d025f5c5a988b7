//! Pipeline lifecycle integration tests.
//!
//! These drive the worker against mock backends and a real temp directory:
//! - artifact layout and completion markers per job kind
//! - marker short-circuit and detection of missing artifacts
//! - stage-level resume after a retryable failure
//! - retry budget, backoff and terminal failures

mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::TestHarness;
use gleaner_core::acquisition::AcquisitionError;
use gleaner_core::config::PipelineConfig;
use gleaner_core::job::{
    ExportKind, JobFilter, JobKind, JobStatus, JobStore, MediaKind, SqliteJobStore,
};
use gleaner_core::pipeline::{Manifest, MarkerState, PipelineDeps, MANIFEST_FILE};
use gleaner_core::reference::parse_reference;
use gleaner_core::testing::fixtures;
use gleaner_core::transcribe::{TranscribeError, Transcriber, TranscriptResult};
use gleaner_core::worker::{Admission, ProcessOutcome, Worker};

const CHAT_URL: &str = "https://t.me/somechan/12";
const VIDEO_URL: &str = "https://youtu.be/abc123xyz";

fn expect_completed(outcome: ProcessOutcome) -> gleaner_core::ArtifactResult {
    match outcome {
        ProcessOutcome::Completed(artifact) => artifact,
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_collect_job_writes_bundle_and_marker_last() {
    let h = TestHarness::new().await;
    h.chat
        .add_item(
            "somechan",
            fixtures::post(
                12,
                Some("Listen to this"),
                vec![
                    fixtures::attachment(MediaKind::Voice),
                    fixtures::document("notes.pdf"),
                ],
            ),
        )
        .await;

    let (reference, job_id) = h.admit(CHAT_URL).await;
    let artifact = expect_completed(h.worker.process(&job_id, &reference, false).await);

    assert_eq!(artifact.kind, JobKind::Collect);
    assert!(!artifact.cached);
    let dir = h.job_dir(&reference, JobKind::Collect);
    assert_eq!(artifact.output_dir, dir);
    assert!(dir.join("text.txt").is_file());
    assert!(dir.join("attachments/voice_12_0.ogg").is_file());
    assert!(dir.join("attachments/notes.pdf").is_file());
    assert!(dir.join("transcript.txt").is_file());
    assert!(dir.join("meta.json").is_file());

    let manifest = match Manifest::check(&dir).await {
        MarkerState::Valid(manifest) => manifest,
        other => panic!("marker not valid: {:?}", other),
    };
    let listed: Vec<&str> = manifest.artifacts.iter().map(|a| a.file.as_str()).collect();
    assert!(listed.contains(&"text.txt"));
    assert!(listed.contains(&"meta.json"));
    assert!(!listed.contains(&MANIFEST_FILE));

    let marker_time = std::fs::metadata(dir.join(MANIFEST_FILE))
        .unwrap()
        .modified()
        .unwrap();
    for artifact in &manifest.artifacts {
        let modified = std::fs::metadata(dir.join(&artifact.file))
            .unwrap()
            .modified()
            .unwrap();
        assert!(modified <= marker_time, "{} written after marker", artifact.file);
    }

    let job = h.job(&job_id);
    assert_eq!(job.status, JobStatus::Done);
    assert!(h
        .store
        .get_export(&job_id, ExportKind::CollectedBundle)
        .unwrap()
        .is_some());
    assert!(h.store.get_transcript(&job_id).unwrap().is_some());

    let meta: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.join("meta.json")).unwrap()).unwrap();
    assert_eq!(meta["message_type"], "mixed");
    assert_eq!(meta["msg_id"], 12);
}

#[tokio::test]
async fn test_media_job_via_classifier() {
    let h = TestHarness::classifying().await;
    h.chat.add_item("somechan", fixtures::voice_post(12)).await;

    let (reference, job_id) = h.admit(CHAT_URL).await;
    assert_eq!(h.job(&job_id).kind, JobKind::Undetermined);

    let artifact = expect_completed(h.worker.process(&job_id, &reference, false).await);
    assert_eq!(artifact.kind, JobKind::Media);

    let dir = h.job_dir(&reference, JobKind::Media);
    assert!(dir.join("transcript.md").is_file());
    assert!(!dir.join("summary.md").exists());
    assert_eq!(h.job(&job_id).kind, JobKind::Media);

    // The payload is gone once transcribed; the job stays resumable from its marker.
    assert!(h.store.get_asset(&job_id).unwrap().is_none());
    assert!(!h.transcriber.calls().await[0].exists());
    assert_eq!(h.summarizer.call_count().await, 0);
}

#[tokio::test]
async fn test_media_job_with_summary() {
    let h = TestHarness::with_config(|c| {
        c.with_chat_kind(gleaner_core::config::ChatKindPolicy::Classify)
            .with_summarize(true)
    })
    .await;
    h.chat.add_item("somechan", fixtures::voice_post(12)).await;

    let (reference, job_id) = h.admit(CHAT_URL).await;
    expect_completed(h.worker.process(&job_id, &reference, false).await);

    let dir = h.job_dir(&reference, JobKind::Media);
    assert!(dir.join("summary.md").is_file());
    assert!(h.store.get_summary(&job_id).unwrap().is_some());
    assert!(h
        .store
        .get_export(&job_id, ExportKind::SummaryDoc)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_ingest_job_via_classifier() {
    let h = TestHarness::classifying().await;
    h.chat
        .add_item(
            "somechan",
            fixtures::post(
                12,
                Some("Read me"),
                vec![fixtures::attachment(MediaKind::Image)],
            ),
        )
        .await;

    let (reference, job_id) = h.admit(CHAT_URL).await;
    let artifact = expect_completed(h.worker.process(&job_id, &reference, false).await);
    assert_eq!(artifact.kind, JobKind::Ingest);

    let dir = h.job_dir(&reference, JobKind::Ingest);
    assert!(dir.join("text.txt").is_file());
    assert!(dir.join("meta.json").is_file());
    assert!(matches!(Manifest::check(&dir).await, MarkerState::Valid(_)));
    assert_eq!(h.transcriber.call_count().await, 0);
}

#[tokio::test]
async fn test_external_job_bundle() {
    let h = TestHarness::new().await;
    let (reference, job_id) = h.admit(VIDEO_URL).await;

    let artifact = expect_completed(h.worker.process(&job_id, &reference, false).await);
    assert_eq!(artifact.kind, JobKind::External);

    let dir = h.job_dir(&reference, JobKind::External);
    assert!(dir.ends_with("collected/external/youtube/abc123xyz"));
    assert!(dir.join("description.txt").is_file());
    assert!(dir.join("attachments/abc123xyz.mp4").is_file());
    assert!(dir.join("attachments/abc123xyz.jpg").is_file());
    assert!(!dir.join("attachments/.incoming").exists());
    assert!(dir.join("transcript.txt").is_file());
    assert!(dir.join("meta.json").is_file());
}

#[tokio::test]
async fn test_marker_short_circuits_without_acquisition() {
    let h = TestHarness::new().await;
    let (reference, job_id) = h.admit(VIDEO_URL).await;
    expect_completed(h.worker.process(&job_id, &reference, false).await);
    let calls = h.external.total_calls().await;
    let transcriptions = h.transcriber.call_count().await;

    // Admission sees a done job with a valid marker.
    assert!(matches!(
        h.worker.admit(&reference, false).await.unwrap(),
        Admission::AlreadyDone(_)
    ));

    // Running anyway hits the marker before any backend call.
    let artifact = expect_completed(h.worker.process(&job_id, &reference, false).await);
    assert!(artifact.cached);
    assert_eq!(h.external.total_calls().await, calls);
    assert_eq!(h.transcriber.call_count().await, transcriptions);
    assert!(artifact
        .exports
        .iter()
        .any(|e| e.kind == ExportKind::CollectedBundle));
}

#[tokio::test]
async fn test_deleted_artifact_is_detected() {
    let h = TestHarness::new().await;
    h.chat
        .add_item("somechan", fixtures::post(12, Some("hello"), vec![]))
        .await;
    let (reference, job_id) = h.admit(CHAT_URL).await;
    expect_completed(h.worker.process(&job_id, &reference, false).await);

    let dir = h.job_dir(&reference, JobKind::Collect);
    std::fs::remove_file(dir.join("text.txt")).unwrap();
    assert!(matches!(Manifest::check(&dir).await, MarkerState::Invalid(_)));

    let admission = h.worker.admit(&reference, false).await.unwrap();
    assert!(matches!(admission, Admission::Ready(_)));

    let artifact = expect_completed(h.worker.process(&job_id, &reference, false).await);
    assert!(!artifact.cached);
    assert!(dir.join("text.txt").is_file());
    assert!(matches!(Manifest::check(&dir).await, MarkerState::Valid(_)));
    assert_eq!(h.chat.fetch_count().await, 2);
}

#[tokio::test]
async fn test_from_start_discards_previous_output() {
    let h = TestHarness::new().await;
    let (reference, job_id) = h.admit(VIDEO_URL).await;
    expect_completed(h.worker.process(&job_id, &reference, false).await);
    let dir = h.job_dir(&reference, JobKind::External);
    std::fs::write(dir.join("stale.txt"), b"left over").unwrap();

    let admission = h.worker.admit(&reference, true).await.unwrap();
    assert!(matches!(admission, Admission::Ready(_)));
    let artifact = expect_completed(h.worker.process(&job_id, &reference, true).await);

    assert!(!artifact.cached);
    assert!(!dir.join("stale.txt").exists());
    assert_eq!(h.external.download_count().await, 2);
    assert_eq!(h.transcriber.call_count().await, 2);
}

#[tokio::test]
async fn test_stage_resume_reuses_download() {
    let h = TestHarness::classifying().await;
    h.chat.add_item("somechan", fixtures::voice_post(12)).await;
    h.transcriber.fail_next(1).await;

    let (reference, job_id) = h.admit(CHAT_URL).await;
    expect_completed(h.worker.process(&job_id, &reference, false).await);

    assert_eq!(h.chat.download_count().await, 1);
    assert_eq!(h.transcriber.call_count().await, 2);
    let calls = h.transcriber.calls().await;
    assert_eq!(calls[0], calls[1]);

    let errors = h.store.list_errors(&job_id).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, "transcribe");
    assert_eq!(errors[0].error_type, "stage");
}

#[tokio::test]
async fn test_non_retryable_gets_single_attempt() {
    let h = TestHarness::new().await;
    // Post never published: the backend reports not found.
    let (reference, job_id) = h.admit(CHAT_URL).await;

    match h.worker.process(&job_id, &reference, false).await {
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
    assert_eq!(h.chat.fetch_count().await, 1);

    let job = h.job(&job_id);
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.last_error.is_some());
    let errors = h.store.list_errors(&job_id).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, "not_found");
    assert_eq!(errors[0].stage, "fetch");
}

#[tokio::test]
async fn test_limit_exceeded_is_terminal() {
    let h = TestHarness::with_config(|c| c.with_max_duration_secs(10)).await;
    let (reference, job_id) = h.admit(VIDEO_URL).await;

    let outcome = h.worker.process(&job_id, &reference, false).await;
    assert!(matches!(
        outcome,
        ProcessOutcome::Failed {
            attempts: 1,
            retryable: false,
            ..
        }
    ));
    assert_eq!(h.external.download_count().await, 0);
    let errors = h.store.list_errors(&job_id).unwrap();
    assert_eq!(errors[0].error_type, "limit_exceeded");
    assert_eq!(errors[0].stage, "fetch");
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_with_exponential_backoff() {
    let h = TestHarness::with_config(|c| c.with_retry_backoff_secs(1.0)).await;
    h.transcriber.fail_next(10).await;
    let (reference, job_id) = h.admit(VIDEO_URL).await;

    let started = tokio::time::Instant::now();
    let outcome = h.worker.process(&job_id, &reference, false).await;
    let elapsed = started.elapsed();

    match outcome {
        ProcessOutcome::Failed {
            attempts,
            retryable,
            ..
        } => {
            assert_eq!(attempts, 3);
            assert!(retryable);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    // 1s after the first failure, 2s after the second, none after the last.
    assert!(elapsed >= Duration::from_secs(3), "waited {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "waited {:?}", elapsed);

    assert_eq!(h.transcriber.call_count().await, 3);
    assert_eq!(h.external.download_count().await, 1);
    let job = h.job(&job_id);
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.retry_count, 3);
    assert_eq!(h.store.list_errors(&job_id).unwrap().len(), 3);
}

#[tokio::test]
async fn test_transient_fetch_error_recovers() {
    let h = TestHarness::new().await;
    h.chat
        .add_item("somechan", fixtures::post(12, Some("hello"), vec![]))
        .await;
    h.chat
        .push_fetch_error(AcquisitionError::RateLimited {
            retry_after_secs: Some(1),
        })
        .await;

    let (reference, job_id) = h.admit(CHAT_URL).await;
    expect_completed(h.worker.process(&job_id, &reference, false).await);
    assert_eq!(h.chat.fetch_count().await, 2);

    let errors = h.store.list_errors(&job_id).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, "fetch");
}

#[tokio::test]
async fn test_audit_trail_records_lifecycle() {
    let h = TestHarness::new().await;
    let (reference, job_id) = h.admit(VIDEO_URL).await;
    expect_completed(h.worker.process(&job_id, &reference, false).await);

    let records = h.audit_for(&job_id).await;
    let types: Vec<&str> = records.iter().map(|r| r.event_type.as_str()).collect();
    assert_eq!(types.first(), Some(&"job_created"));
    assert_eq!(types.last(), Some(&"job_completed"));
    assert!(types.contains(&"job_status_changed"));
}

#[tokio::test]
async fn test_concurrent_admission_creates_one_job() {
    let h = Arc::new(TestHarness::new().await);
    let reference = parse_reference(VIDEO_URL).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let worker = h.worker.clone();
        let reference = reference.clone();
        handles.push(tokio::spawn(async move {
            worker.admit(&reference, false).await.unwrap().job().id.clone()
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(h.store.count(&JobFilter::new()).unwrap(), 1);
}

#[tokio::test]
async fn test_equivalent_urls_share_a_job() {
    let h = TestHarness::new().await;
    let (_, first) = h.admit("https://t.me/somechan/12").await;
    let (_, second) = h.admit("https://telegram.me/somechan/12?single").await;
    assert_eq!(first, second);
}

/// Cancels every job in the store while transcribing, then fails transiently.
struct CancellingTranscriber {
    store: Arc<SqliteJobStore>,
    calls: AtomicUsize,
}

#[async_trait]
impl Transcriber for CancellingTranscriber {
    fn name(&self) -> &str {
        "cancelling"
    }

    async fn transcribe(&self, _path: &Path) -> Result<TranscriptResult, TranscribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for job in self.store.list(&JobFilter::new()).unwrap() {
            self.store
                .update_status(&job.id, JobStatus::Cancelled, None)
                .unwrap();
        }
        Err(TranscribeError::Failed("transient".to_string()))
    }
}

#[tokio::test]
async fn test_cancel_during_attempt_stops_retries() {
    let h = TestHarness::new().await;
    let (reference, job_id) = h.admit(VIDEO_URL).await;

    let transcriber = Arc::new(CancellingTranscriber {
        store: h.store.clone(),
        calls: AtomicUsize::new(0),
    });
    let config = PipelineConfig::rooted_at(h.root.path())
        .with_max_attempts(3)
        .with_retry_backoff_secs(0.0);
    let worker = Worker::new(
        PipelineDeps::new(h.store.clone(), transcriber.clone(), config)
            .with_external(h.external.clone()),
    );

    let outcome = worker.process(&job_id, &reference, false).await;
    assert!(matches!(outcome, ProcessOutcome::Cancelled { .. }));
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);

    let job = h.job(&job_id);
    assert_eq!(job.status, JobStatus::Cancelled);
    let errors = h.store.list_errors(&job_id).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, "transcribe");
}

#[tokio::test]
async fn test_errored_job_is_not_rerun_without_admission() {
    let h = TestHarness::with_config(|c| c.with_max_attempts(1)).await;
    h.transcriber.fail_next(10).await;
    let (reference, job_id) = h.admit(VIDEO_URL).await;

    assert!(matches!(
        h.worker.process(&job_id, &reference, false).await,
        ProcessOutcome::Failed { .. }
    ));
    assert_eq!(h.transcriber.call_count().await, 1);

    match h.worker.process(&job_id, &reference, false).await {
        ProcessOutcome::Failed { attempts, .. } => assert_eq!(attempts, 0),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(h.transcriber.call_count().await, 1);
    assert_eq!(h.job(&job_id).status, JobStatus::Error);
}
