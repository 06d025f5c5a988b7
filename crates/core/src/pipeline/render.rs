//! Markdown export documents.

use std::fmt::Write;

use crate::job::{Summary, Transcript};
use crate::transcribe::{format_timestamp, format_with_timestamps};

/// Transcript document with a metadata header and timestamped paragraphs.
pub fn render_transcript_doc(title: &str, source_url: &str, transcript: &Transcript) -> String {
    let mut doc = String::new();
    let _ = writeln!(doc, "# {}", title);
    let _ = writeln!(doc);
    let _ = writeln!(doc, "- Source: {}", source_url);
    if let Some(language) = &transcript.language {
        let _ = writeln!(doc, "- Language: {}", language);
    }
    if let Some(duration) = transcript.duration_secs {
        let _ = writeln!(doc, "- Duration: {}", format_timestamp(duration));
    }
    let _ = writeln!(doc, "- Words: {}", transcript.word_count);
    if transcript.low_confidence_count > 0 {
        let _ = writeln!(
            doc,
            "- Low-confidence segments: {}",
            transcript.low_confidence_count
        );
    }
    let _ = writeln!(doc, "- Engine: {}", transcript.engine);
    let _ = writeln!(doc);

    let body = format_with_timestamps(&transcript.segments);
    if body.is_empty() {
        doc.push_str("_No speech recognized._\n");
    } else {
        doc.push_str(&body);
        if !body.ends_with('\n') {
            doc.push('\n');
        }
    }
    doc
}

pub fn render_summary_doc(title: &str, source_url: &str, summary: &Summary) -> String {
    let mut doc = String::new();
    let _ = writeln!(doc, "# {} (summary)", title);
    let _ = writeln!(doc);
    let _ = writeln!(doc, "- Source: {}", source_url);
    let _ = writeln!(doc, "- Language: {}", summary.language);
    let _ = writeln!(doc, "- Engine: {}", summary.engine);
    if summary.chunks > 1 {
        let _ = writeln!(doc, "- Chunks: {}", summary.chunks);
    }
    let _ = writeln!(doc);
    doc.push_str(summary.content.trim());
    doc.push('\n');
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Segment;

    fn transcript() -> Transcript {
        Transcript {
            job_id: "j1".to_string(),
            full_text: "hello there general".to_string(),
            segments: vec![
                Segment {
                    start: 0.0,
                    end: 1.5,
                    text: "hello there".to_string(),
                    confidence: -0.2,
                },
                Segment {
                    start: 5.0,
                    end: 6.0,
                    text: "general".to_string(),
                    confidence: -1.4,
                },
            ],
            language: Some("en".to_string()),
            engine: "whisper:base".to_string(),
            duration_secs: Some(6.0),
            word_count: 3,
            low_confidence_count: 1,
        }
    }

    #[test]
    fn test_transcript_doc() {
        let doc = render_transcript_doc("Post 42", "https://t.me/chan/42", &transcript());
        assert!(doc.starts_with("# Post 42\n"));
        assert!(doc.contains("- Source: https://t.me/chan/42"));
        assert!(doc.contains("- Low-confidence segments: 1"));
        assert!(doc.contains("[00:00:00]"));
        assert!(doc.contains("[00:00:05]"));
    }

    #[test]
    fn test_empty_transcript_doc() {
        let mut t = transcript();
        t.segments.clear();
        let doc = render_transcript_doc("Post", "u", &t);
        assert!(doc.contains("_No speech recognized._"));
    }

    #[test]
    fn test_summary_doc() {
        let summary = Summary {
            job_id: "j1".to_string(),
            content: "  Key points.  ".to_string(),
            engine: "anthropic:claude".to_string(),
            language: "en".to_string(),
            chunks: 2,
        };
        let doc = render_summary_doc("Post", "u", &summary);
        assert!(doc.contains("- Chunks: 2"));
        assert!(doc.ends_with("Key points.\n"));
    }
}
