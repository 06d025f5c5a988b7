//! Speech-to-text boundary and transcript formatting.

mod whisper;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub use crate::job::Segment;
use crate::job::Transcript;
pub use whisper::WhisperCliTranscriber;

/// Segments whose confidence falls below this are counted as unrecognized.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = -1.0;

/// Pause (seconds) that starts a new paragraph in the timestamped rendering.
const PARAGRAPH_GAP_SECS: f64 = 2.0;

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("transcriber not available: {0}")]
    NotAvailable(String),

    #[error("transcription failed: {0}")]
    Failed(String),

    #[error("transcription timed out after {0}s")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Engine output for one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptResult {
    pub segments: Vec<Segment>,
    pub language: Option<String>,
    /// Engine identifier, e.g. `whisper:base`.
    pub engine: String,
    pub duration_secs: Option<f64>,
}

impl TranscriptResult {
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn word_count(&self) -> u32 {
        self.full_text().split_whitespace().count() as u32
    }

    pub fn low_confidence_count(&self) -> u32 {
        self.segments
            .iter()
            .filter(|s| s.confidence < LOW_CONFIDENCE_THRESHOLD)
            .count() as u32
    }

    /// Concatenate several results into one timeline.
    ///
    /// Each part is shifted by the total duration of the parts before it.
    pub fn merge(parts: Vec<TranscriptResult>) -> Option<TranscriptResult> {
        let mut parts = parts.into_iter();
        let mut merged = parts.next()?;
        let mut offset = merged.span();

        for part in parts {
            let span = part.span();
            merged.segments.extend(part.segments.into_iter().map(|s| Segment {
                start: s.start + offset,
                end: s.end + offset,
                ..s
            }));
            if merged.language.is_none() {
                merged.language = part.language;
            }
            offset += span;
        }

        merged.duration_secs = Some(offset);
        Some(merged)
    }

    fn span(&self) -> f64 {
        self.duration_secs
            .or_else(|| self.segments.last().map(|s| s.end))
            .unwrap_or(0.0)
    }

    pub fn into_transcript(self, job_id: &str) -> Transcript {
        Transcript {
            job_id: job_id.to_string(),
            full_text: self.full_text(),
            word_count: self.word_count(),
            low_confidence_count: self.low_confidence_count(),
            segments: self.segments,
            language: self.language,
            engine: self.engine,
            duration_secs: self.duration_secs,
        }
    }
}

/// Speech-to-text engine.
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(&self, path: &Path) -> Result<TranscriptResult, TranscribeError>;
}

/// Render segments as paragraphs prefixed with `[HH:MM:SS]`.
///
/// A new paragraph starts whenever the pause before a segment exceeds two seconds.
pub fn format_with_timestamps(segments: &[Segment]) -> String {
    let mut paragraphs: Vec<(f64, Vec<&str>)> = Vec::new();
    let mut last_end: Option<f64> = None;

    for segment in segments {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }
        let new_paragraph = match last_end {
            None => true,
            Some(end) => segment.start - end > PARAGRAPH_GAP_SECS,
        };
        if new_paragraph {
            paragraphs.push((segment.start, vec![text]));
        } else if let Some((_, texts)) = paragraphs.last_mut() {
            texts.push(text);
        }
        last_end = Some(segment.end);
    }

    paragraphs
        .into_iter()
        .map(|(start, texts)| format!("[{}]\n{}", format_timestamp(start), texts.join(" ")))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `HH:MM:SS` for a position in seconds.
pub fn format_timestamp(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}
