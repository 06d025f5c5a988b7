//! External video backend driven by the `yt-dlp` command line tool.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{
    media_kind_for_path, mime_for_path, AcquisitionError, DownloadedFile, ExternalSource,
    RemoteMetadata,
};
use crate::config::ExternalConfig;
use crate::job::MediaKind;
use crate::reference::ExternalLink;

/// Output template stem for downloaded files.
const OUTPUT_STEM: &str = "video";

/// [`ExternalSource`] backed by a `yt-dlp` subprocess.
pub struct YtDlpSource {
    config: ExternalConfig,
}

#[derive(Debug, Deserialize)]
struct DumpedInfo {
    title: Option<String>,
    uploader: Option<String>,
    upload_date: Option<String>,
    duration: Option<f64>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
    description: Option<String>,
    webpage_url: Option<String>,
}

impl YtDlpSource {
    pub fn new(config: ExternalConfig) -> Self {
        Self { config }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec!["--no-playlist".to_string(), "--no-progress".to_string()];
        if let Some(ref cookies) = self.config.cookies_file {
            args.push("--cookies".to_string());
            args.push(cookies.display().to_string());
        }
        args
    }

    async fn run(&self, args: &[String]) -> Result<Vec<u8>, AcquisitionError> {
        debug!(command = %self.config.command, ?args, "Running external downloader");

        let child = Command::new(&self.config.command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AcquisitionError::Other(format!(
                        "downloader not found: {}",
                        self.config.command
                    ))
                } else {
                    AcquisitionError::Io(e)
                }
            })?;

        let limit = Duration::from_secs(self.config.timeout_secs);
        let output = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| {
                AcquisitionError::Connection(format!("downloader timed out after {:?}", limit))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        Ok(output.stdout)
    }
}

/// Map downloader stderr onto the acquisition taxonomy.
fn classify_failure(stderr: &str) -> AcquisitionError {
    let message = stderr
        .lines()
        .filter(|l| l.contains("ERROR"))
        .last()
        .unwrap_or_else(|| stderr.trim())
        .trim()
        .to_string();
    let lower = stderr.to_lowercase();

    if lower.contains("sign in") || lower.contains("age-restricted") || lower.contains("confirm your age") {
        AcquisitionError::AccessDenied(format!(
            "{} (age-restricted or private; configure external.cookies_file)",
            message
        ))
    } else if lower.contains("private video") || lower.contains("members-only") {
        AcquisitionError::AccessDenied(message)
    } else if lower.contains("unsupported url") {
        AcquisitionError::Unsupported(message)
    } else if lower.contains("video unavailable")
        || lower.contains("has been removed")
        || lower.contains("http error 404")
        || lower.contains("does not exist")
    {
        AcquisitionError::NotFound(message)
    } else if lower.contains("http error 429") || lower.contains("too many requests") {
        AcquisitionError::RateLimited {
            retry_after_secs: None,
        }
    } else {
        AcquisitionError::Other(message)
    }
}

#[async_trait]
impl ExternalSource for YtDlpSource {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn fetch_metadata(&self, link: &ExternalLink) -> Result<RemoteMetadata, AcquisitionError> {
        let mut args = self.base_args();
        args.push("--dump-single-json".to_string());
        args.push("--skip-download".to_string());
        args.push(link.url.clone());

        let stdout = self.run(&args).await?;
        let info: DumpedInfo = serde_json::from_slice(&stdout)
            .map_err(|e| AcquisitionError::Other(format!("unreadable metadata: {}", e)))?;

        Ok(RemoteMetadata {
            title: info.title,
            uploader: info.uploader,
            upload_date: info.upload_date,
            duration_secs: info.duration,
            filesize_bytes: info.filesize.or(info.filesize_approx),
            description: info.description,
            webpage_url: info.webpage_url,
        })
    }

    async fn download(
        &self,
        link: &ExternalLink,
        dest_dir: &Path,
    ) -> Result<Vec<DownloadedFile>, AcquisitionError> {
        tokio::fs::create_dir_all(dest_dir).await?;

        let mut args = self.base_args();
        args.push("--write-thumbnail".to_string());
        args.push("--convert-thumbnails".to_string());
        args.push("jpg".to_string());
        if let Some(ref format) = self.config.format {
            args.push("-f".to_string());
            args.push(format.clone());
        }
        args.push("-o".to_string());
        args.push(
            dest_dir
                .join(format!("{}.%(ext)s", OUTPUT_STEM))
                .display()
                .to_string(),
        );
        args.push(link.url.clone());

        self.run(&args).await?;

        let files = collect_outputs(dest_dir).await?;
        if !files.iter().any(|f| f.kind != MediaKind::Image) {
            warn!(url = %link.url, "Downloader finished without producing a video file");
            return Err(AcquisitionError::Other(
                "download produced no video file".to_string(),
            ));
        }
        Ok(files)
    }
}

async fn collect_outputs(dir: &Path) -> Result<Vec<DownloadedFile>, AcquisitionError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path: PathBuf = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(OUTPUT_STEM) || name.ends_with(".part") || name.ends_with(".ytdl") {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        files.push(DownloadedFile {
            kind: media_kind_for_path(&path),
            mime_type: mime_for_path(&path).map(String::from),
            duration_secs: None,
            size_bytes: metadata.len(),
            path,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_age_restricted() {
        let err = classify_failure("ERROR: [youtube] abc: Sign in to confirm your age\n");
        match err {
            AcquisitionError::AccessDenied(msg) => assert!(msg.contains("cookies_file")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify_failure("ERROR: [youtube] abc: Video unavailable");
        assert!(matches!(err, AcquisitionError::NotFound(_)));
    }

    #[test]
    fn test_classify_unsupported() {
        let err = classify_failure("ERROR: Unsupported URL: https://example.com/x");
        assert!(matches!(err, AcquisitionError::Unsupported(_)));
    }

    #[test]
    fn test_classify_transient() {
        let err = classify_failure("ERROR: unable to download webpage: timed out");
        assert!(matches!(err, AcquisitionError::Other(_)));
        assert!(!err.is_terminal());

        let err = classify_failure("ERROR: HTTP Error 429: Too Many Requests");
        assert!(matches!(err, AcquisitionError::RateLimited { .. }));
    }

    #[test]
    fn test_dumped_info_parses() {
        let json = r#"{"title": "Talk", "duration": 61.5, "filesize_approx": 1000, "id": "x"}"#;
        let info: DumpedInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.title.as_deref(), Some("Talk"));
        assert_eq!(info.filesize.or(info.filesize_approx), Some(1000));
    }

    #[tokio::test]
    async fn test_collect_outputs_skips_partials() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("video.mp4"), b"0123456789").unwrap();
        std::fs::write(dir.path().join("video.jpg"), b"img").unwrap();
        std::fs::write(dir.path().join("video.mp4.part"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let files = collect_outputs(dir.path()).await.unwrap();
        assert_eq!(files.len(), 2);
        let video = files.iter().find(|f| f.kind == MediaKind::Video).unwrap();
        assert_eq!(video.size_bytes, 10);
        assert_eq!(video.mime_type.as_deref(), Some("video/mp4"));
    }
}
