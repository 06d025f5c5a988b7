use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{Segment, TranscribeError, Transcriber, TranscriptResult};
use crate::config::TranscriberConfig;

/// [`Transcriber`] that runs a Whisper-compatible CLI and reads its JSON output.
pub struct WhisperCliTranscriber {
    config: TranscriberConfig,
    engine: String,
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    avg_logprob: f64,
}

impl WhisperCliTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        let engine = format!("whisper:{}", config.model);
        Self { config, engine }
    }

    fn parse_output(&self, raw: &str) -> Result<TranscriptResult, TranscribeError> {
        let output: WhisperOutput = serde_json::from_str(raw)
            .map_err(|e| TranscribeError::Failed(format!("unreadable output: {}", e)))?;

        let segments: Vec<Segment> = output
            .segments
            .into_iter()
            .map(|s| Segment {
                start: s.start,
                end: s.end,
                text: s.text.trim().to_string(),
                confidence: s.avg_logprob,
            })
            .collect();
        let duration_secs = segments.last().map(|s| s.end);

        Ok(TranscriptResult {
            segments,
            language: output.language.or_else(|| self.config.language.clone()),
            engine: self.engine.clone(),
            duration_secs,
        })
    }
}

#[async_trait]
impl Transcriber for WhisperCliTranscriber {
    fn name(&self) -> &str {
        &self.engine
    }

    async fn transcribe(&self, path: &Path) -> Result<TranscriptResult, TranscribeError> {
        let out_dir = path
            .parent()
            .map(|p| p.join(".whisper"))
            .unwrap_or_else(|| std::env::temp_dir().join("gleaner-whisper"));
        tokio::fs::create_dir_all(&out_dir).await?;

        let mut args = vec![
            path.display().to_string(),
            "--model".to_string(),
            self.config.model.clone(),
            "--output_format".to_string(),
            "json".to_string(),
            "--output_dir".to_string(),
            out_dir.display().to_string(),
        ];
        if let Some(ref language) = self.config.language {
            args.push("--language".to_string());
            args.push(language.clone());
        }

        debug!(command = %self.config.command, file = %path.display(), "Starting transcription");

        let child = Command::new(&self.config.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscribeError::NotAvailable(self.config.command.clone())
                } else {
                    TranscribeError::Io(e)
                }
            })?;

        let output = timeout(
            Duration::from_secs(self.config.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| TranscribeError::Timeout(self.config.timeout_secs))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscribeError::Failed(stderr.trim().to_string()));
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let json_path = out_dir.join(format!("{}.json", stem));
        let raw = tokio::fs::read_to_string(&json_path).await?;
        let _ = tokio::fs::remove_dir_all(&out_dir).await;

        self.parse_output(&raw)
    }
}
