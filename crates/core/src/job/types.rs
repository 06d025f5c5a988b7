//! Job records and the side-table rows produced by pipeline stages.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which orchestrator handles a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Not classified yet.
    Undetermined,
    /// Audio/video payload: download, transcribe, render exports.
    Media,
    /// Text, images and documents persisted verbatim.
    Ingest,
    /// Full bundle of a chat post (album, attachments, transcript, metadata).
    Collect,
    /// Video hosted outside the chat platform.
    External,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Undetermined => "undetermined",
            JobKind::Media => "media",
            JobKind::Ingest => "ingest",
            JobKind::Collect => "collect",
            JobKind::External => "external",
        }
    }

    /// Kinds assigned at creation time that classification must never overwrite.
    pub fn is_fixed(&self) -> bool {
        matches!(self, JobKind::Collect | JobKind::External)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "undetermined" => Ok(JobKind::Undetermined),
            "media" => Ok(JobKind::Media),
            "ingest" => Ok(JobKind::Ingest),
            "collect" => Ok(JobKind::Collect),
            "external" => Ok(JobKind::External),
            other => Err(format!("unknown job kind: {}", other)),
        }
    }
}

/// Job status. Stage-specific values let observers see which stage is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Analyzing,
    Downloading,
    Collecting,
    Transcribing,
    Summarizing,
    Exporting,
    Saving,
    Done,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Downloading => "downloading",
            JobStatus::Collecting => "collecting",
            JobStatus::Transcribing => "transcribing",
            JobStatus::Summarizing => "summarizing",
            JobStatus::Exporting => "exporting",
            JobStatus::Saving => "saving",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// A stage is currently running for this job.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            JobStatus::Analyzing
                | JobStatus::Downloading
                | JobStatus::Collecting
                | JobStatus::Transcribing
                | JobStatus::Summarizing
                | JobStatus::Exporting
                | JobStatus::Saving
        )
    }

    /// Terminal with respect to the current attempt sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Error | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "analyzing" => Ok(JobStatus::Analyzing),
            "downloading" => Ok(JobStatus::Downloading),
            "collecting" => Ok(JobStatus::Collecting),
            "transcribing" => Ok(JobStatus::Transcribing),
            "summarizing" => Ok(JobStatus::Summarizing),
            "exporting" => Ok(JobStatus::Exporting),
            "saving" => Ok(JobStatus::Saving),
            "done" => Ok(JobStatus::Done),
            "error" => Ok(JobStatus::Error),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// One job per unique reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Identity key of the input reference. Unique across the store.
    pub reference: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Shape of an acquired payload or attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
    Voice,
    VideoNote,
    Image,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Voice => "voice",
            MediaKind::VideoNote => "video_note",
            MediaKind::Image => "image",
            MediaKind::Document => "document",
        }
    }

    /// Audio or video that can be transcribed.
    pub fn is_av(&self) -> bool {
        matches!(
            self,
            MediaKind::Audio | MediaKind::Video | MediaKind::Voice | MediaKind::VideoNote
        )
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(MediaKind::Audio),
            "video" => Ok(MediaKind::Video),
            "voice" => Ok(MediaKind::Voice),
            "video_note" => Ok(MediaKind::VideoNote),
            "image" => Ok(MediaKind::Image),
            "document" => Ok(MediaKind::Document),
            other => Err(format!("unknown media kind: {}", other)),
        }
    }
}

/// Acquired binary payload. The path is cleared once the payload is no longer needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub job_id: String,
    pub kind: MediaKind,
    pub original_name: Option<String>,
    pub mime_type: Option<String>,
    pub path: Option<PathBuf>,
    pub size_bytes: u64,
    pub duration_secs: Option<f64>,
    /// Hex SHA-256 of the payload, recorded at download time.
    pub sha256: Option<String>,
    pub downloaded_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Asset row to insert.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub job_id: String,
    pub kind: MediaKind,
    pub original_name: Option<String>,
    pub mime_type: Option<String>,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration_secs: Option<f64>,
    pub sha256: Option<String>,
}

/// One time-stamped span of recognized speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    /// Average log-probability reported by the engine.
    pub confidence: f64,
}

/// At most one per job. Never rewritten once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub job_id: String,
    pub full_text: String,
    pub segments: Vec<Segment>,
    pub language: Option<String>,
    pub engine: String,
    pub duration_secs: Option<f64>,
    pub word_count: u32,
    pub low_confidence_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub job_id: String,
    pub content: String,
    pub engine: String,
    pub language: String,
    pub chunks: u32,
}

/// Kind of exported document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportKind {
    TranscriptDoc,
    SummaryDoc,
    CollectedBundle,
    IngestWiki,
}

impl ExportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportKind::TranscriptDoc => "transcript-doc",
            ExportKind::SummaryDoc => "summary-doc",
            ExportKind::CollectedBundle => "collected-bundle",
            ExportKind::IngestWiki => "ingest-wiki",
        }
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcript-doc" => Ok(ExportKind::TranscriptDoc),
            "summary-doc" => Ok(ExportKind::SummaryDoc),
            "collected-bundle" => Ok(ExportKind::CollectedBundle),
            "ingest-wiki" => Ok(ExportKind::IngestWiki),
            other => Err(format!("unknown export kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
    pub id: i64,
    pub job_id: String,
    pub kind: ExportKind,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Entry in the durable error trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: i64,
    pub job_id: String,
    pub stage: String,
    pub error_type: String,
    pub message: String,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewErrorRecord {
    pub job_id: String,
    pub stage: String,
    pub error_type: String,
    pub message: String,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip_strings() {
        for kind in [
            JobKind::Undetermined,
            JobKind::Media,
            JobKind::Ingest,
            JobKind::Collect,
            JobKind::External,
        ] {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
        assert!("video".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_fixed_kinds() {
        assert!(JobKind::Collect.is_fixed());
        assert!(JobKind::External.is_fixed());
        assert!(!JobKind::Media.is_fixed());
        assert!(!JobKind::Undetermined.is_fixed());
    }

    #[test]
    fn test_status_classes() {
        assert!(JobStatus::Downloading.is_in_progress());
        assert!(JobStatus::Saving.is_in_progress());
        assert!(!JobStatus::Pending.is_in_progress());
        assert!(!JobStatus::Done.is_in_progress());
        assert!(JobStatus::Error.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn test_media_kind_av() {
        assert!(MediaKind::Voice.is_av());
        assert!(MediaKind::VideoNote.is_av());
        assert!(!MediaKind::Image.is_av());
        assert!(!MediaKind::Document.is_av());
    }

    #[test]
    fn test_export_kind_serde() {
        let json = serde_json::to_string(&ExportKind::CollectedBundle).unwrap();
        assert_eq!(json, "\"collected-bundle\"");
        assert_eq!(
            "summary-doc".parse::<ExportKind>().unwrap(),
            ExportKind::SummaryDoc
        );
    }
}
