//! Ingest pipeline: persist a post's text, images and documents verbatim.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::debug;

use super::files::{file_size, partial_path, write_atomic};
use super::manifest::Manifest;
use super::tracker::{check_limits, check_marker, ExportSpec, StageTracker};
use super::{
    ArtifactResult, JobContext, PipelineDeps, PipelineError, Stage, StagePipeline, TerminalError,
};
use crate::acquisition::{ChatSource, ContentItem};
use crate::job::{ExportKind, JobKind, JobStatus};

const EXPORTS: &[ExportSpec] = &[(ExportKind::IngestWiki, "")];

pub struct IngestPipeline {
    deps: PipelineDeps,
}

impl IngestPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }
}

/// Download attachment `index` of `item` to `dest` unless a complete copy exists.
///
/// Downloads land on a `.part` file first, so an existing `dest` is never a
/// partial transfer.
pub(crate) async fn fetch_attachment(
    deps: &PipelineDeps,
    chat: &dyn ChatSource,
    item: &ContentItem,
    index: usize,
    dest: &Path,
) -> Result<u64, PipelineError> {
    let attachment = &item.attachments[index];

    if let Some(size) = file_size(dest).await {
        if size > 0 && attachment.size_bytes.map_or(true, |expected| expected == size) {
            debug!(file = %dest.display(), "Attachment already present");
            return Ok(size);
        }
    }

    check_limits(&deps.config, attachment.size_bytes, attachment.duration_secs)
        .map_err(|e| e.at(Stage::Download))?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::stage(Stage::Download, e))?;
    }
    let downloaded = chat
        .download(item, index, &partial_path(dest))
        .await
        .map_err(|e| PipelineError::acquisition(Stage::Download, e))?;
    tokio::fs::rename(&downloaded.path, dest)
        .await
        .map_err(|e| PipelineError::stage(Stage::Download, e))?;

    Ok(downloaded.size_bytes)
}

#[async_trait]
impl StagePipeline for IngestPipeline {
    fn kind(&self) -> JobKind {
        JobKind::Ingest
    }

    async fn run(&self, ctx: &JobContext) -> Result<ArtifactResult, PipelineError> {
        let link = ctx.reference.as_chat().ok_or_else(|| {
            TerminalError::Unsupported("ingest jobs need a chat post reference".to_string())
                .at(Stage::Classify)
        })?;
        let dir = ctx
            .reference
            .output_dir(JobKind::Ingest, &self.deps.config.output_dir);

        if let Some(cached) = check_marker(&self.deps, ctx, JobKind::Ingest, &dir, EXPORTS).await?
        {
            return Ok(cached);
        }

        let chat = self.deps.chat()?;
        let mut tracker = StageTracker::new(&self.deps, ctx, JobKind::Ingest);
        tracker.enter(JobStatus::Collecting).await?;

        let item = chat
            .fetch_item(link)
            .await
            .map_err(|e| PipelineError::acquisition(Stage::Fetch, e))?;
        if item.is_empty() {
            return Err(TerminalError::Unsupported(format!(
                "post {} has neither text nor attachments",
                link.message_id
            ))
            .at(Stage::Fetch));
        }

        let mut manifest = Manifest::new(JobKind::Ingest, Some(link.canonical_url()));
        let persist = |e: std::io::Error| PipelineError::stage(Stage::Persist, e);

        if let Some(text) = item.text.as_deref().filter(|t| !t.trim().is_empty()) {
            let path = dir.join("text.txt");
            write_atomic(&path, text.as_bytes()).await.map_err(persist)?;
            manifest.add_file(&dir, &path, "text", None).await.map_err(persist)?;
        }

        let mut files = Vec::new();
        for (index, attachment) in item.attachments.iter().enumerate() {
            let folder = if attachment.is_image() { "images" } else { "docs" };
            let name = attachment.target_name(item.id, index);
            let path = dir.join(folder).join(&name);
            let size = fetch_attachment(&self.deps, chat.as_ref(), &item, index, &path).await?;
            manifest
                .add_file(&dir, &path, folder.trim_end_matches('s'), None)
                .await
                .map_err(persist)?;
            files.push(json!({
                "name": format!("{}/{}", folder, name),
                "kind": attachment.kind,
                "mime_type": attachment.mime_type,
                "size_bytes": size,
            }));
        }

        let meta = json!({
            "msg_id": link.message_id,
            "channel": link.channel.to_string(),
            "url": link.canonical_url(),
            "date": item.date,
            "has_text": item.has_text(),
            "files": files,
            "forward": item.forward,
            "collected_at": Utc::now(),
        });
        let meta_path = dir.join("meta.json");
        let meta_bytes = serde_json::to_vec_pretty(&meta)
            .map_err(|e| PipelineError::stage(Stage::Persist, e))?;
        write_atomic(&meta_path, &meta_bytes).await.map_err(persist)?;
        manifest
            .add_file(&dir, &meta_path, "metadata", None)
            .await
            .map_err(persist)?;

        tracker.complete(&dir, &mut manifest, EXPORTS).await
    }
}
