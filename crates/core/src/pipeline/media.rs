//! Media pipeline: acquire payload, transcribe, render exports.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::files::{self, is_complete, partial_path, sha256_file, write_atomic};
use super::manifest::Manifest;
use super::render::{render_summary_doc, render_transcript_doc};
use super::tracker::{check_limits, check_marker, ExportSpec, StageTracker};
use super::{
    ArtifactResult, JobContext, PipelineDeps, PipelineError, Stage, StagePipeline, TerminalError,
};
use crate::job::{ExportKind, JobError, JobKind, JobStatus, NewAsset, Summary, Transcript};
use crate::reference::ChatLink;

const TRANSCRIPT_DOC: &str = "transcript.md";
const SUMMARY_DOC: &str = "summary.md";

const EXPORTS: &[ExportSpec] = &[
    (ExportKind::TranscriptDoc, TRANSCRIPT_DOC),
    (ExportKind::SummaryDoc, SUMMARY_DOC),
];

pub struct MediaPipeline {
    deps: PipelineDeps,
}

impl MediaPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Download the first audio/video attachment into the temp dir,
    /// reusing an earlier download that still verifies.
    async fn acquire_payload(
        &self,
        job_id: &str,
        link: &ChatLink,
    ) -> Result<PathBuf, PipelineError> {
        let store = &self.deps.store;

        if let Some(asset) = store.get_asset(job_id)? {
            if let Some(path) = asset.path.as_deref() {
                if is_complete(path, Some(asset.size_bytes), asset.sha256.as_deref()).await {
                    debug!(job_id = %job_id, path = %path.display(), "Reusing downloaded payload");
                    return Ok(path.to_path_buf());
                }
            }
            warn!(job_id = %job_id, "Recorded payload is missing or damaged, downloading again");
            store.mark_asset_deleted(job_id)?;
        }

        let chat = self.deps.chat()?;
        let item = chat
            .fetch_item(link)
            .await
            .map_err(|e| PipelineError::acquisition(Stage::Fetch, e))?;
        let index = item.first_av().ok_or_else(|| {
            TerminalError::Unsupported(format!("post {} has no audio or video", link.message_id))
                .at(Stage::Fetch)
        })?;
        let attachment = &item.attachments[index];
        check_limits(
            &self.deps.config,
            attachment.size_bytes,
            attachment.duration_secs,
        )
        .map_err(|e| e.at(Stage::Fetch))?;

        let dest = self
            .deps
            .config
            .temp_dir
            .join(job_id)
            .join(attachment.target_name(item.id, index));
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::stage(Stage::Download, e))?;
        }

        let partial = partial_path(&dest);
        let downloaded = chat
            .download(&item, index, &partial)
            .await
            .map_err(|e| PipelineError::acquisition(Stage::Download, e))?;
        tokio::fs::rename(&downloaded.path, &dest)
            .await
            .map_err(|e| PipelineError::stage(Stage::Download, e))?;
        check_limits(&self.deps.config, Some(downloaded.size_bytes), downloaded.duration_secs)
            .map_err(|e| e.at(Stage::Download))?;

        let sha256 = sha256_file(&dest)
            .await
            .map_err(|e| PipelineError::stage(Stage::Download, e))?;
        store.save_asset(NewAsset {
            job_id: job_id.to_string(),
            kind: downloaded.kind,
            original_name: attachment.file_name.clone(),
            mime_type: downloaded.mime_type.clone(),
            path: dest.clone(),
            size_bytes: downloaded.size_bytes,
            duration_secs: downloaded.duration_secs,
            sha256: Some(sha256),
        })?;
        info!(job_id = %job_id, bytes = downloaded.size_bytes, "Payload downloaded");

        Ok(dest)
    }

    async fn transcribe(
        &self,
        ctx: &JobContext,
        link: &ChatLink,
        tracker: &mut StageTracker<'_>,
    ) -> Result<Transcript, PipelineError> {
        let job_id = ctx.job.id.as_str();
        let store = &self.deps.store;

        if let Some(transcript) = store.get_transcript(job_id)? {
            debug!(job_id = %job_id, "Transcript already stored");
            return Ok(transcript);
        }

        tracker.enter(JobStatus::Downloading).await?;
        let payload = self.acquire_payload(job_id, link).await?;

        tracker.enter(JobStatus::Transcribing).await?;
        let result = self
            .deps
            .transcriber
            .transcribe(&payload)
            .await
            .map_err(|e| PipelineError::stage(Stage::Transcribe, e))?;
        let transcript = result.into_transcript(job_id);

        match store.save_transcript(&transcript) {
            Ok(()) => {}
            Err(JobError::Duplicate(_)) => {
                debug!(job_id = %job_id, "Transcript saved concurrently, keeping stored copy");
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = files::remove_if_exists(&payload).await {
            warn!(job_id = %job_id, error = %e, "Failed to delete payload");
        }
        if let Some(parent) = payload.parent() {
            let _ = tokio::fs::remove_dir(parent).await;
        }
        store.mark_asset_deleted(job_id)?;

        Ok(store.get_transcript(job_id)?.unwrap_or(transcript))
    }

    async fn summarize(
        &self,
        job_id: &str,
        transcript: &Transcript,
        tracker: &mut StageTracker<'_>,
    ) -> Result<Option<Summary>, PipelineError> {
        let Some(summarizer) = self.deps.summarizer.as_ref() else {
            return Ok(None);
        };
        if !self.deps.config.summarize || transcript.full_text.trim().is_empty() {
            return Ok(None);
        }
        if let Some(summary) = self.deps.store.get_summary(job_id)? {
            return Ok(Some(summary));
        }

        tracker.enter(JobStatus::Summarizing).await?;
        let result = summarizer
            .summarize(&transcript.full_text, &self.deps.summary_language)
            .await
            .map_err(|e| PipelineError::stage(Stage::Summarize, e))?;
        let summary = Summary {
            job_id: job_id.to_string(),
            content: result.content,
            engine: result.engine,
            language: self.deps.summary_language.clone(),
            chunks: result.chunks,
        };
        self.deps.store.save_summary(&summary)?;
        Ok(Some(summary))
    }
}

#[async_trait]
impl StagePipeline for MediaPipeline {
    fn kind(&self) -> JobKind {
        JobKind::Media
    }

    async fn run(&self, ctx: &JobContext) -> Result<ArtifactResult, PipelineError> {
        let link = ctx.reference.as_chat().ok_or_else(|| {
            TerminalError::Unsupported("media jobs need a chat post reference".to_string())
                .at(Stage::Classify)
        })?;
        let dir = ctx
            .reference
            .output_dir(JobKind::Media, &self.deps.config.output_dir);

        if let Some(cached) = check_marker(&self.deps, ctx, JobKind::Media, &dir, EXPORTS).await? {
            return Ok(cached);
        }

        let mut tracker = StageTracker::new(&self.deps, ctx, JobKind::Media);
        let job_id = ctx.job.id.as_str();

        let transcript = self.transcribe(ctx, link, &mut tracker).await?;
        let summary = self.summarize(job_id, &transcript, &mut tracker).await?;

        tracker.enter(JobStatus::Exporting).await?;
        let title = format!("{} #{}", link.channel, link.message_id);
        let source_url = link.canonical_url();
        let mut manifest = Manifest::new(JobKind::Media, Some(source_url.clone()));

        let transcript_path = dir.join(TRANSCRIPT_DOC);
        write_atomic(
            &transcript_path,
            render_transcript_doc(&title, &source_url, &transcript).as_bytes(),
        )
        .await
        .map_err(|e| PipelineError::stage(Stage::Export, e))?;
        manifest
            .add_file(&dir, &transcript_path, "transcript", None)
            .await
            .map_err(|e| PipelineError::stage(Stage::Export, e))?;

        if let Some(summary) = &summary {
            let summary_path = dir.join(SUMMARY_DOC);
            write_atomic(
                &summary_path,
                render_summary_doc(&title, &source_url, summary).as_bytes(),
            )
            .await
            .map_err(|e| PipelineError::stage(Stage::Export, e))?;
            manifest
                .add_file(&dir, &summary_path, "summary", None)
                .await
                .map_err(|e| PipelineError::stage(Stage::Export, e))?;
        }

        tracker.complete(&dir, &mut manifest, EXPORTS).await
    }
}
