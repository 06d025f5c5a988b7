//! Mock transcription and summarization engines.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::job::Segment;
use crate::summarize::{SummarizeError, Summarizer, SummaryResult};
use crate::transcribe::{TranscribeError, Transcriber, TranscriptResult};

/// Returns a canned transcript; can be told to fail the next N calls.
#[derive(Debug)]
pub struct MockTranscriber {
    result: Arc<RwLock<TranscriptResult>>,
    failures_left: Arc<RwLock<u32>>,
    calls: Arc<RwLock<Vec<PathBuf>>>,
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTranscriber {
    pub fn new() -> Self {
        Self {
            result: Arc::new(RwLock::new(super::fixtures::transcript_result(&[
                "hello there",
                "this is a test recording",
            ]))),
            failures_left: Arc::new(RwLock::new(0)),
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn set_result(&self, result: TranscriptResult) {
        *self.result.write().await = result;
    }

    /// Fail the next `n` calls with a retryable engine error.
    pub async fn fail_next(&self, n: u32) {
        *self.failures_left.write().await = n;
    }

    /// Payload paths in call order.
    pub async fn calls(&self) -> Vec<PathBuf> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transcribe(&self, path: &Path) -> Result<TranscriptResult, TranscribeError> {
        self.calls.write().await.push(path.to_path_buf());

        let mut failures = self.failures_left.write().await;
        if *failures > 0 {
            *failures -= 1;
            return Err(TranscribeError::Failed("mock engine crashed".to_string()));
        }
        drop(failures);

        if tokio::fs::metadata(path).await.is_err() {
            return Err(TranscribeError::Failed(format!(
                "payload missing: {}",
                path.display()
            )));
        }
        Ok(self.result.read().await.clone())
    }
}

/// Summarizer that echoes the first words of its input.
#[derive(Debug, Default)]
pub struct MockSummarizer {
    failures_left: Arc<RwLock<u32>>,
    calls: Arc<RwLock<usize>>,
}

impl MockSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_next(&self, n: u32) {
        *self.failures_left.write().await = n;
    }

    pub async fn call_count(&self) -> usize {
        *self.calls.read().await
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn summarize(&self, text: &str, language: &str) -> Result<SummaryResult, SummarizeError> {
        *self.calls.write().await += 1;

        let mut failures = self.failures_left.write().await;
        if *failures > 0 {
            *failures -= 1;
            return Err(SummarizeError::Api {
                status: 529,
                message: "overloaded".to_string(),
            });
        }
        drop(failures);

        if text.trim().is_empty() {
            return Err(SummarizeError::EmptyInput);
        }
        let head: Vec<&str> = text.split_whitespace().take(8).collect();
        Ok(SummaryResult {
            content: format!("[{}] {}", language, head.join(" ")),
            engine: "mock:summarizer".to_string(),
            chunks: 1,
        })
    }
}

/// Canned segment list used by [`MockTranscriber`].
pub(crate) fn segments(texts: &[&str]) -> Vec<Segment> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| Segment {
            start: i as f64 * 5.0,
            end: i as f64 * 5.0 + 4.0,
            text: text.to_string(),
            confidence: -0.2,
        })
        .collect()
}
