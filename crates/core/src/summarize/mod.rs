//! LLM summarization boundary.

mod anthropic;

use async_trait::async_trait;
use thiserror::Error;

pub use anthropic::AnthropicSummarizer;

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("empty response from model")]
    EmptyResponse,

    #[error("nothing to summarize")]
    EmptyInput,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryResult {
    pub content: String,
    /// Engine identifier, e.g. `anthropic:<model>`.
    pub engine: String,
    /// Number of chunks the input was split into.
    pub chunks: u32,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &str;

    /// Summarize `text`, writing the summary in `language`.
    async fn summarize(&self, text: &str, language: &str) -> Result<SummaryResult, SummarizeError>;
}

/// Split `text` into chunks of at most `max_chars` characters, preferring paragraph breaks.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let needed = if current.is_empty() {
            paragraph.chars().count()
        } else {
            current.chars().count() + 2 + paragraph.chars().count()
        };

        if needed <= max_chars {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        if paragraph.chars().count() <= max_chars {
            current.push_str(paragraph);
        } else {
            // Hard split of an oversized paragraph
            let chars: Vec<char> = paragraph.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
