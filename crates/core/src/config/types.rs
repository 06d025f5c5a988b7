use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::job::JobKind;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub transcriber: TranscriberConfig,
    #[serde(default)]
    pub summarizer: Option<SummarizerConfig>,
    #[serde(default)]
    pub external: ExternalConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/gleaner.db")
}

/// How freshly submitted chat references are routed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKindPolicy {
    /// Create chat jobs directly as collect jobs.
    #[default]
    Collect,
    /// Leave the kind undetermined and let the classifier pick media or ingest.
    Classify,
}

impl ChatKindPolicy {
    /// Kind assigned at job creation for a chat reference.
    pub fn initial_kind(&self) -> JobKind {
        match self {
            ChatKindPolicy::Collect => JobKind::Collect,
            ChatKindPolicy::Classify => JobKind::Undetermined,
        }
    }
}

/// Pipeline execution settings shared by the worker and every orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Root directory for all job artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Scratch directory for payloads that are deleted after transcription.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Maximum attempts per job before it is marked as error.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff in seconds. Attempt N waits `base * 2^(N-1)`.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: f64,

    /// Ceiling on media duration.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,

    /// Ceiling on a single payload size, in megabytes.
    #[serde(default = "default_max_file_mb")]
    pub max_file_mb: u64,

    #[serde(default)]
    pub chat_kind: ChatKindPolicy,

    /// Run the summarize stage for media jobs (requires a summarizer).
    #[serde(default)]
    pub summarize: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            temp_dir: default_temp_dir(),
            max_attempts: default_max_attempts(),
            retry_backoff_secs: default_retry_backoff_secs(),
            max_duration_secs: default_max_duration_secs(),
            max_file_mb: default_max_file_mb(),
            chat_kind: ChatKindPolicy::default(),
            summarize: false,
        }
    }
}

impl PipelineConfig {
    /// Config rooted at `root`, with `output/` and `tmp/` underneath.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            output_dir: root.join("output"),
            temp_dir: root.join("tmp"),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_backoff_secs(mut self, secs: f64) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    pub fn with_max_duration_secs(mut self, secs: u64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    pub fn with_max_file_mb(mut self, mb: u64) -> Self {
        self.max_file_mb = mb;
        self
    }

    pub fn with_chat_kind(mut self, policy: ChatKindPolicy) -> Self {
        self.chat_kind = policy;
        self
    }

    pub fn with_summarize(mut self, summarize: bool) -> Self {
        self.summarize = summarize;
        self
    }

    /// Payload ceiling in bytes.
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_mb.saturating_mul(1024 * 1024)
    }

    /// Wait before attempt `attempt + 1`, given that `attempt` (1-based) just failed.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let secs = self.retry_backoff_secs.max(0.0) * 2f64.powi(exponent);
        Duration::from_secs_f64(secs)
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./tmp")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_secs() -> f64 {
    30.0
}

fn default_max_duration_secs() -> u64 {
    7200
}

fn default_max_file_mb() -> u64 {
    2000
}

/// Speech-to-text CLI settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscriberConfig {
    #[serde(default = "default_transcriber_command")]
    pub command: String,
    #[serde(default = "default_transcriber_model")]
    pub model: String,
    /// Force a language instead of auto-detection.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_subprocess_timeout")]
    pub timeout_secs: u64,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            command: default_transcriber_command(),
            model: default_transcriber_model(),
            language: None,
            timeout_secs: default_subprocess_timeout(),
        }
    }
}

fn default_transcriber_command() -> String {
    "whisper".to_string()
}

fn default_transcriber_model() -> String {
    "base".to_string()
}

fn default_subprocess_timeout() -> u64 {
    3600
}

/// LLM summarizer settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SummarizerConfig {
    pub api_key: String,
    #[serde(default = "default_summarizer_model")]
    pub model: String,
    #[serde(default)]
    pub api_base: Option<String>,
    /// Language the summary is written in.
    #[serde(default = "default_summary_language")]
    pub language: String,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
}

fn default_summarizer_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_summary_language() -> String {
    "en".to_string()
}

fn default_max_chunk_chars() -> usize {
    120_000
}

/// External video downloader settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExternalConfig {
    #[serde(default = "default_external_command")]
    pub command: String,
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default = "default_subprocess_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            command: default_external_command(),
            cookies_file: None,
            format: None,
            timeout_secs: default_subprocess_timeout(),
        }
    }
}

fn default_external_command() -> String {
    "yt-dlp".to_string()
}

/// Temp directory housekeeping
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CleanupConfig {
    #[serde(default = "default_true")]
    pub cleanup_temp: bool,
    #[serde(default = "default_orphan_retention_hours")]
    pub orphan_retention_hours: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            cleanup_temp: true,
            orphan_retention_hours: default_orphan_retention_hours(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_orphan_retention_hours() -> u64 {
    24
}

/// Audit trail settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_buffer")]
    pub buffer_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_audit_buffer(),
        }
    }
}

fn default_audit_buffer() -> usize {
    1000
}
