//! Testing utilities and mock implementations of every backend trait.
//!
//! The mocks let the full pipeline run end to end against a temp directory
//! and an in-memory store, with no network or external binaries.
//!
//! # Example
//!
//! ```rust,ignore
//! use gleaner_core::testing::{fixtures, MockChatSource, MockTranscriber};
//!
//! let chat = MockChatSource::new();
//! chat.add_item("somechan", fixtures::voice_post(12)).await;
//!
//! let transcriber = MockTranscriber::new();
//! transcriber.fail_next(2).await;
//! ```

mod mock_chat;
mod mock_engines;
mod mock_external;

pub use mock_chat::{ChatCallCounts, MockChatSource};
pub use mock_engines::{MockSummarizer, MockTranscriber};
pub use mock_external::MockExternalSource;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::acquisition::{Attachment, ContentItem};
    use crate::job::MediaKind;
    use crate::transcribe::TranscriptResult;

    /// A post with reasonable defaults.
    pub fn post(id: i64, text: Option<&str>, attachments: Vec<Attachment>) -> ContentItem {
        ContentItem {
            id,
            text: text.map(String::from),
            attachments,
            ..Default::default()
        }
    }

    /// A post holding a single voice message.
    pub fn voice_post(id: i64) -> ContentItem {
        post(id, None, vec![attachment(MediaKind::Voice)])
    }

    /// Member `id` of album `group`.
    pub fn album_post(id: i64, group: i64, text: Option<&str>, attachments: Vec<Attachment>) -> ContentItem {
        ContentItem {
            grouped_id: Some(group),
            ..post(id, text, attachments)
        }
    }

    /// An attachment of `kind` with a MIME type, a small size and, for
    /// audio/video, a 30 second duration.
    pub fn attachment(kind: MediaKind) -> Attachment {
        let mime = match kind {
            MediaKind::Audio => "audio/mpeg",
            MediaKind::Voice => "audio/ogg",
            MediaKind::Video | MediaKind::VideoNote => "video/mp4",
            MediaKind::Image => "image/jpeg",
            MediaKind::Document => "application/pdf",
        };
        Attachment {
            kind,
            mime_type: Some(mime.to_string()),
            file_name: None,
            size_bytes: Some(2048),
            duration_secs: kind.is_av().then_some(30.0),
        }
    }

    /// A named document attachment.
    pub fn document(file_name: &str) -> Attachment {
        Attachment {
            file_name: Some(file_name.to_string()),
            ..attachment(MediaKind::Document)
        }
    }

    /// An engine result with one four-second segment per text.
    pub fn transcript_result(texts: &[&str]) -> TranscriptResult {
        let segments = super::mock_engines::segments(texts);
        let duration = segments.last().map(|s| s.end);
        TranscriptResult {
            segments,
            language: Some("en".to_string()),
            engine: "mock:whisper".to_string(),
            duration_secs: duration,
        }
    }
}
