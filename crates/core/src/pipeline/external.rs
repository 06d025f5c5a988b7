//! External video pipeline: metadata, download, transcript, bundle.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::collect::{transcribe_into_store, transcript_meta};
use super::files::{is_complete, sha256_file, write_atomic};
use super::manifest::Manifest;
use super::tracker::{check_limits, check_marker, ExportSpec, StageTracker};
use super::{
    ArtifactResult, JobContext, PipelineDeps, PipelineError, Stage, StagePipeline, TerminalError,
};
use crate::acquisition::{media_kind_for_path, mime_for_path, DownloadedFile, RemoteMetadata};
use crate::job::{ExportKind, JobKind, JobStatus, MediaKind, NewAsset};
use crate::reference::ExternalLink;
use crate::transcribe::format_with_timestamps;

const EXPORTS: &[ExportSpec] = &[(ExportKind::CollectedBundle, "")];

/// Staging folder inside `attachments/` for an in-flight download.
const INCOMING_DIR: &str = ".incoming";

pub struct ExternalPipeline {
    deps: PipelineDeps,
}

impl ExternalPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Download into a staging folder, then move the files into `attachments/`.
    async fn download(
        &self,
        job_id: &str,
        link: &ExternalLink,
        attachments: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let store = &self.deps.store;
        let io = |e: std::io::Error| PipelineError::stage(Stage::Download, e);

        if let Some(asset) = store.get_asset(job_id)? {
            if let Some(path) = asset.path.as_deref() {
                if is_complete(path, Some(asset.size_bytes), asset.sha256.as_deref()).await {
                    debug!(job_id = %job_id, path = %path.display(), "Reusing downloaded video");
                    return Ok(path.to_path_buf());
                }
            }
            store.mark_asset_deleted(job_id)?;
        }

        let incoming = attachments.join(INCOMING_DIR);
        match tokio::fs::remove_dir_all(&incoming).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io(e)),
        }
        tokio::fs::create_dir_all(&incoming).await.map_err(io)?;

        let files = self
            .deps
            .external()?
            .download(link, &incoming)
            .await
            .map_err(|e| PipelineError::acquisition(Stage::Download, e))?;
        let video = pick_video(&files).ok_or_else(|| {
            PipelineError::stage(Stage::Download, "downloader produced no video file")
        })?;
        check_limits(&self.deps.config, Some(video.size_bytes), video.duration_secs)
            .map_err(|e| e.at(Stage::Download))?;

        let mut video_path = None;
        for file in &files {
            let Some(name) = file.path.file_name() else {
                continue;
            };
            let dest = attachments.join(name);
            tokio::fs::rename(&file.path, &dest).await.map_err(io)?;
            if file.path == video.path {
                video_path = Some(dest);
            }
        }
        let _ = tokio::fs::remove_dir_all(&incoming).await;
        let video_path = video_path.ok_or_else(|| {
            PipelineError::stage(Stage::Download, "video file vanished while moving")
        })?;

        let sha256 = sha256_file(&video_path).await.map_err(io)?;
        store.save_asset(NewAsset {
            job_id: job_id.to_string(),
            kind: video.kind,
            original_name: video_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            mime_type: video.mime_type.clone(),
            path: video_path.clone(),
            size_bytes: video.size_bytes,
            duration_secs: video.duration_secs,
            sha256: Some(sha256),
        })?;
        info!(job_id = %job_id, bytes = video.size_bytes, "Video downloaded");

        Ok(video_path)
    }
}

/// The largest non-image file.
fn pick_video(files: &[DownloadedFile]) -> Option<&DownloadedFile> {
    files
        .iter()
        .filter(|f| f.kind != MediaKind::Image)
        .max_by_key(|f| f.size_bytes)
}

fn describe(meta: &RemoteMetadata, url: &str) -> String {
    let mut lines = Vec::new();
    if let Some(title) = &meta.title {
        lines.push(format!("Title: {}", title));
    }
    if let Some(uploader) = &meta.uploader {
        lines.push(format!("Uploader: {}", uploader));
    }
    if let Some(date) = &meta.upload_date {
        lines.push(format!("Date: {}", date));
    }
    lines.push(format!("URL: {}", url));
    if let Some(description) = meta.description.as_deref().filter(|d| !d.trim().is_empty()) {
        lines.push(String::new());
        lines.push(description.trim().to_string());
    }
    lines.join("\n") + "\n"
}

#[async_trait]
impl StagePipeline for ExternalPipeline {
    fn kind(&self) -> JobKind {
        JobKind::External
    }

    async fn run(&self, ctx: &JobContext) -> Result<ArtifactResult, PipelineError> {
        let link = ctx.reference.as_external().ok_or_else(|| {
            TerminalError::Unsupported("external jobs need a video URL".to_string())
                .at(Stage::Classify)
        })?;
        let dir = ctx
            .reference
            .output_dir(JobKind::External, &self.deps.config.output_dir);

        if let Some(cached) =
            check_marker(&self.deps, ctx, JobKind::External, &dir, EXPORTS).await?
        {
            return Ok(cached);
        }

        let source = self.deps.external()?;
        let job_id = ctx.job.id.as_str();
        let mut tracker = StageTracker::new(&self.deps, ctx, JobKind::External);
        let persist = |e: std::io::Error| PipelineError::stage(Stage::Persist, e);
        let mut manifest = Manifest::new(JobKind::External, Some(link.url.clone()));

        // Analyze
        tracker.enter(JobStatus::Analyzing).await?;
        let meta = source
            .fetch_metadata(link)
            .await
            .map_err(|e| PipelineError::acquisition(Stage::Fetch, e))?;
        check_limits(&self.deps.config, meta.filesize_bytes, meta.duration_secs)
            .map_err(|e| e.at(Stage::Fetch))?;

        let description_path = dir.join("description.txt");
        write_atomic(&description_path, describe(&meta, &link.url).as_bytes())
            .await
            .map_err(persist)?;

        // Download
        tracker.enter(JobStatus::Downloading).await?;
        let attachments = dir.join("attachments");
        tokio::fs::create_dir_all(&attachments)
            .await
            .map_err(persist)?;
        let video_path = self.download(job_id, link, &attachments).await?;

        // Transcribe
        tracker.enter(JobStatus::Transcribing).await?;
        let transcript =
            transcribe_into_store(&self.deps, job_id, std::slice::from_ref(&video_path)).await?;

        // Save
        tracker.enter(JobStatus::Saving).await?;
        manifest
            .add_file(&dir, &description_path, "description", None)
            .await
            .map_err(persist)?;

        let mut entries = tokio::fs::read_dir(&attachments).await.map_err(persist)?;
        let mut files: Vec<Value> = Vec::new();
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(persist)? {
            if entry.file_type().await.map_err(persist)?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();
        for path in &paths {
            let kind = media_kind_for_path(path);
            let artifact_type = if path == &video_path {
                "video"
            } else if kind == MediaKind::Image {
                "thumbnail"
            } else {
                "attachment"
            };
            manifest
                .add_file(&dir, path, artifact_type, None)
                .await
                .map_err(persist)?;
            if let Some(artifact) = manifest.artifacts.last() {
                files.push(json!({
                    "name": artifact.file,
                    "type": artifact_type,
                    "mime_type": mime_for_path(path),
                    "size_bytes": artifact.size_bytes,
                }));
            }
        }

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

        let meta_json = json!({
            "source": link.host.as_str(),
            "video_id": link.video_id,
            "url": link.url,
            "title": meta.title,
            "uploader": meta.uploader,
            "upload_date": meta.upload_date,
            "duration_secs": meta.duration_secs,
            "webpage_url": meta.webpage_url,
            "transcript": transcript_meta(transcript.as_ref()),
            "files": files,
            "collected_at": Utc::now(),
        });
        let meta_path = dir.join("meta.json");
        let meta_bytes = serde_json::to_vec_pretty(&meta_json)
            .map_err(|e| PipelineError::stage(Stage::Persist, e))?;
        write_atomic(&meta_path, &meta_bytes).await.map_err(persist)?;
        manifest
            .add_file(&dir, &meta_path, "metadata", None)
            .await
            .map_err(persist)?;

        tracker.complete(&dir, &mut manifest, EXPORTS).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, kind: MediaKind, size: u64) -> DownloadedFile {
        DownloadedFile {
            path: PathBuf::from(name),
            kind,
            mime_type: None,
            duration_secs: None,
            size_bytes: size,
        }
    }

    #[test]
    fn test_pick_video_skips_thumbnail() {
        let files = vec![
            file("thumb.jpg", MediaKind::Image, 900_000),
            file("video.mp4", MediaKind::Video, 500_000),
            file("video.en.vtt", MediaKind::Document, 2_000),
        ];
        assert_eq!(pick_video(&files).unwrap().path, PathBuf::from("video.mp4"));
        assert!(pick_video(&files[..1]).is_none());
    }

    #[test]
    fn test_describe() {
        let meta = RemoteMetadata {
            title: Some("Talk".to_string()),
            uploader: Some("Someone".to_string()),
            upload_date: Some("20240101".to_string()),
            description: Some("  About things.  ".to_string()),
            ..Default::default()
        };
        let text = describe(&meta, "https://youtu.be/abc");
        assert_eq!(
            text,
            "Title: Talk\nUploader: Someone\nDate: 20240101\nURL: https://youtu.be/abc\n\nAbout things.\n"
        );
    }
}
