//! Collect pipeline: the full bundle of a chat post.
//!
//! Resolves the album, stores every text and attachment, transcribes any
//! audio/video into one timeline, then writes `meta.json` and the marker.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::files::{sha256_file, write_atomic};
use super::ingest::fetch_attachment;
use super::manifest::Manifest;
use super::tracker::{check_marker, ExportSpec, StageTracker};
use super::{
    ArtifactResult, JobContext, PipelineDeps, PipelineError, Stage, StagePipeline, TerminalError,
};
use crate::acquisition::{media_kind_for_path, mime_for_path, ContentItem};
use crate::job::{ExportKind, JobError, JobKind, JobStatus, NewAsset, Transcript};
use crate::transcribe::{format_with_timestamps, TranscriptResult};

const EXPORTS: &[ExportSpec] = &[(ExportKind::CollectedBundle, "")];

pub(crate) const TEXT_SEPARATOR: &str = "\n\n---\n\n";

pub struct CollectPipeline {
    deps: PipelineDeps,
}

/// One stored attachment.
struct CollectedFile {
    path: PathBuf,
    name: String,
    is_av: bool,
    is_image: bool,
    mime_type: Option<String>,
    size_bytes: u64,
}

impl CollectPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }
}

/// Coarse shape of a bundle, recorded in `meta.json`.
pub(crate) fn message_type(
    has_text: bool,
    has_av: bool,
    has_images: bool,
    has_docs: bool,
) -> &'static str {
    match (has_av, has_text) {
        (true, false) => "audio_video",
        (true, true) => "mixed",
        _ if has_images => "text_with_images",
        _ if has_docs => "text_with_docs",
        _ => "text_only",
    }
}

/// Transcribe `paths` in order and merge them into one transcript,
/// reusing a stored transcript when there is one.
pub(crate) async fn transcribe_into_store(
    deps: &PipelineDeps,
    job_id: &str,
    paths: &[PathBuf],
) -> Result<Option<Transcript>, PipelineError> {
    if let Some(transcript) = deps.store.get_transcript(job_id)? {
        debug!(job_id = %job_id, "Transcript already stored");
        return Ok(Some(transcript));
    }

    let mut parts = Vec::with_capacity(paths.len());
    for path in paths {
        let part = deps
            .transcriber
            .transcribe(path)
            .await
            .map_err(|e| PipelineError::stage(Stage::Transcribe, e))?;
        parts.push(part);
    }
    let Some(merged) = TranscriptResult::merge(parts) else {
        return Ok(None);
    };

    let transcript = merged.into_transcript(job_id);
    match deps.store.save_transcript(&transcript) {
        Ok(()) | Err(JobError::Duplicate(_)) => {}
        Err(e) => return Err(e.into()),
    }
    Ok(deps.store.get_transcript(job_id)?.or(Some(transcript)))
}

/// Summary of a transcript for `meta.json`.
pub(crate) fn transcript_meta(transcript: Option<&Transcript>) -> Value {
    match transcript {
        Some(t) => json!({
            "file": "transcript.txt",
            "language": t.language,
            "engine": t.engine,
            "duration_secs": t.duration_secs,
            "word_count": t.word_count,
            "low_confidence_count": t.low_confidence_count,
        }),
        None => Value::Null,
    }
}

#[async_trait]
impl StagePipeline for CollectPipeline {
    fn kind(&self) -> JobKind {
        JobKind::Collect
    }

    async fn run(&self, ctx: &JobContext) -> Result<ArtifactResult, PipelineError> {
        let link = ctx.reference.as_chat().ok_or_else(|| {
            TerminalError::Unsupported("collect jobs need a chat post reference".to_string())
                .at(Stage::Classify)
        })?;
        let dir = ctx
            .reference
            .output_dir(JobKind::Collect, &self.deps.config.output_dir);

        if let Some(cached) =
            check_marker(&self.deps, ctx, JobKind::Collect, &dir, EXPORTS).await?
        {
            return Ok(cached);
        }

        let chat = self.deps.chat()?;
        let job_id = ctx.job.id.as_str();
        let mut tracker = StageTracker::new(&self.deps, ctx, JobKind::Collect);
        let persist = |e: std::io::Error| PipelineError::stage(Stage::Persist, e);

        // Analyze
        tracker.enter(JobStatus::Analyzing).await?;
        let item = chat
            .fetch_item(link)
            .await
            .map_err(|e| PipelineError::acquisition(Stage::Fetch, e))?;
        let mut album: Vec<ContentItem> = if item.grouped_id.is_some() {
            chat.fetch_album(link, &item)
                .await
                .map_err(|e| PipelineError::acquisition(Stage::Fetch, e))?
        } else {
            vec![item.clone()]
        };
        album.sort_by_key(|i| i.id);
        if album.iter().all(ContentItem::is_empty) {
            return Err(TerminalError::Unsupported(format!(
                "post {} has neither text nor attachments",
                link.message_id
            ))
            .at(Stage::Fetch));
        }

        // Collect
        tracker.enter(JobStatus::Collecting).await?;
        let mut manifest = Manifest::new(JobKind::Collect, Some(link.canonical_url()));

        let texts: Vec<&str> = album
            .iter()
            .filter_map(|i| i.text.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        let text = texts.join(TEXT_SEPARATOR);
        if !text.is_empty() {
            let path = dir.join("text.txt");
            write_atomic(&path, text.as_bytes()).await.map_err(persist)?;
            manifest.add_file(&dir, &path, "text", None).await.map_err(persist)?;
        }

        let mut collected = Vec::new();
        let mut used_names = HashSet::new();
        for post in &album {
            for (index, attachment) in post.attachments.iter().enumerate() {
                let mut name = attachment.target_name(post.id, index);
                if !used_names.insert(name.clone()) {
                    name = format!("{}_{}", post.id, name);
                    used_names.insert(name.clone());
                }
                let path = dir.join("attachments").join(&name);
                let size =
                    fetch_attachment(&self.deps, chat.as_ref(), post, index, &path).await?;
                collected.push(CollectedFile {
                    path,
                    name,
                    is_av: attachment.is_av(),
                    is_image: attachment.is_image(),
                    mime_type: attachment.mime_type.clone(),
                    size_bytes: size,
                });
            }
        }
        for file in &collected {
            manifest
                .add_file(&dir, &file.path, "attachment", None)
                .await
                .map_err(persist)?;
        }

        // Transcribe
        let av_paths: Vec<PathBuf> = collected
            .iter()
            .filter(|f| f.is_av)
            .map(|f| f.path.clone())
            .collect();
        let transcript = if av_paths.is_empty() {
            None
        } else {
            tracker.enter(JobStatus::Transcribing).await?;
            if self.deps.store.get_asset(job_id)?.is_none() {
                let first = &av_paths[0];
                let size_bytes = tokio::fs::metadata(first).await.map_err(persist)?.len();
                let sha256 = sha256_file(first).await.map_err(persist)?;
                self.deps.store.save_asset(NewAsset {
                    job_id: job_id.to_string(),
                    kind: media_kind_for_path(first),
                    original_name: first.file_name().map(|n| n.to_string_lossy().into_owned()),
                    mime_type: mime_for_path(first).map(String::from),
                    path: first.clone(),
                    size_bytes,
                    duration_secs: None,
                    sha256: Some(sha256),
                })?;
            }
            transcribe_into_store(&self.deps, job_id, &av_paths).await?
        };

        // Save
        tracker.enter(JobStatus::Saving).await?;
        if let Some(transcript) = &transcript {
            let path = dir.join("transcript.txt");
            write_atomic(&path, format_with_timestamps(&transcript.segments).as_bytes())
                .await
                .map_err(persist)?;
            manifest
                .add_file(&dir, &path, "transcript", None)
                .await
                .map_err(persist)?;
        }

        let has_images = collected.iter().any(|f| f.is_image);
        let has_docs = collected.iter().any(|f| !f.is_av && !f.is_image);
        let files: Vec<Value> = collected
            .iter()
            .map(|f| {
                json!({
                    "name": format!("attachments/{}", f.name),
                    "mime_type": f.mime_type,
                    "size_bytes": f.size_bytes,
                    "audio_video": f.is_av,
                })
            })
            .collect();
        let text_file = (!text.is_empty()).then_some("text.txt");
        let kind_label = message_type(!text.is_empty(), !av_paths.is_empty(), has_images, has_docs);
        let meta = json!({
            "msg_id": link.message_id,
            "channel": link.channel.to_string(),
            "url": link.canonical_url(),
            "date": item.date,
            "message_type": kind_label,
            "text": {
                "present": !text.is_empty(),
                "chars": text.chars().count(),
                "file": text_file,
            },
            "transcript": transcript_meta(transcript.as_ref()),
            "files": files,
            "collected_at": Utc::now(),
            "album": {
                "grouped_id": item.grouped_id,
                "message_ids": album.iter().map(|i| i.id).collect::<Vec<_>>(),
            },
            "forward": item.forward,
        });
        let meta_path = dir.join("meta.json");
        let meta_bytes = serde_json::to_vec_pretty(&meta)
            .map_err(|e| PipelineError::stage(Stage::Persist, e))?;
        write_atomic(&meta_path, &meta_bytes).await.map_err(persist)?;
        manifest
            .add_file(&dir, &meta_path, "metadata", None)
            .await
            .map_err(persist)?;

        info!(job_id = %job_id, posts = album.len(), files = collected.len(), "Bundle collected");
        tracker.complete(&dir, &mut manifest, EXPORTS).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type() {
        assert_eq!(message_type(false, true, false, false), "audio_video");
        assert_eq!(message_type(true, true, true, false), "mixed");
        assert_eq!(message_type(true, false, true, false), "text_with_images");
        assert_eq!(message_type(false, false, false, true), "text_with_docs");
        assert_eq!(message_type(true, false, false, false), "text_only");
    }

    #[test]
    fn test_transcript_meta_null_without_transcript() {
        assert_eq!(transcript_meta(None), Value::Null);
    }
}
