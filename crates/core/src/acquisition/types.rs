use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::MediaKind;

/// One file attached to a chat post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: MediaKind,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub size_bytes: Option<u64>,
    pub duration_secs: Option<f64>,
}

impl Attachment {
    /// Audio/video by attribute or by MIME prefix.
    pub fn is_av(&self) -> bool {
        if self.kind.is_av() {
            return true;
        }
        self.mime_type
            .as_deref()
            .map(|m| m.starts_with("audio/") || m.starts_with("video/"))
            .unwrap_or(false)
    }

    pub fn is_image(&self) -> bool {
        if self.is_av() {
            return false;
        }
        self.kind == MediaKind::Image
            || self
                .mime_type
                .as_deref()
                .map(|m| m.starts_with("image/"))
                .unwrap_or(false)
    }

    pub fn is_document(&self) -> bool {
        !self.is_av() && !self.is_image()
    }

    /// Deterministic local file name for this attachment of post `item_id`.
    pub fn target_name(&self, item_id: i64, index: usize) -> String {
        if let Some(name) = self.file_name.as_deref().and_then(sanitize_file_name) {
            return name;
        }
        let ext = self
            .mime_type
            .as_deref()
            .and_then(extension_for_mime)
            .unwrap_or(default_extension(self.kind));
        format!("{}_{}_{}.{}", self.kind.as_str(), item_id, index, ext)
    }
}

fn sanitize_file_name(name: &str) -> Option<String> {
    let base = Path::new(name).file_name()?.to_string_lossy().into_owned();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == '/' || c == '\\' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn default_extension(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Audio => "mp3",
        MediaKind::Voice => "ogg",
        MediaKind::Video | MediaKind::VideoNote => "mp4",
        MediaKind::Image => "jpg",
        MediaKind::Document => "bin",
    }
}

/// Forwarding origin of a post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForwardInfo {
    pub from_name: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub channel_post: Option<i64>,
    pub from_id: Option<String>,
}

/// A fetched chat post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub text: Option<String>,
    pub date: Option<DateTime<Utc>>,
    /// Shared by every post of one album.
    pub grouped_id: Option<i64>,
    pub attachments: Vec<Attachment>,
    pub forward: Option<ForwardInfo>,
}

impl ContentItem {
    pub fn has_text(&self) -> bool {
        self.text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn has_av(&self) -> bool {
        self.attachments.iter().any(Attachment::is_av)
    }

    /// Index of the first audio/video attachment.
    pub fn first_av(&self) -> Option<usize> {
        self.attachments.iter().position(Attachment::is_av)
    }

    pub fn is_empty(&self) -> bool {
        !self.has_text() && self.attachments.is_empty()
    }
}

/// A file written by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub mime_type: Option<String>,
    pub duration_secs: Option<f64>,
    pub size_bytes: u64,
}

/// Metadata of an external video, known before download.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteMetadata {
    pub title: Option<String>,
    pub uploader: Option<String>,
    /// As reported by the host, usually `YYYYMMDD`.
    pub upload_date: Option<String>,
    pub duration_secs: Option<f64>,
    /// Exact or approximate payload size.
    pub filesize_bytes: Option<u64>,
    pub description: Option<String>,
    pub webpage_url: Option<String>,
}

pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let ext = match mime {
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/flac" => "flac",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "video/x-matroska" => "mkv",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "text/plain" => "txt",
        _ => return None,
    };
    Some(ext)
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "mp3" => "audio/mpeg",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        _ => return None,
    };
    Some(mime)
}

/// Media kind guessed from a file extension.
pub fn media_kind_for_path(path: &Path) -> MediaKind {
    match mime_for_path(path) {
        Some(m) if m.starts_with("video/") => MediaKind::Video,
        Some(m) if m.starts_with("audio/") => MediaKind::Audio,
        Some(m) if m.starts_with("image/") => MediaKind::Image,
        _ => MediaKind::Document,
    }
}
