use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ArtifactResult;
use crate::acquisition::AcquisitionError;
use crate::job::JobError;

/// Stage a failure was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classify,
    Fetch,
    Download,
    Transcribe,
    Summarize,
    Export,
    Persist,
    Unknown,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classify => "classify",
            Stage::Fetch => "fetch",
            Stage::Download => "download",
            Stage::Transcribe => "transcribe",
            Stage::Summarize => "summarize",
            Stage::Export => "export",
            Stage::Persist => "persist",
            Stage::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures known to never succeed on retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminalError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("content not found: {0}")]
    NotFound(String),

    #[error("unsupported content: {0}")]
    Unsupported(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
}

impl TerminalError {
    pub fn error_type(&self) -> &'static str {
        match self {
            TerminalError::AccessDenied(_) => "access_denied",
            TerminalError::NotFound(_) => "not_found",
            TerminalError::Unsupported(_) => "unsupported",
            TerminalError::LimitExceeded(_) => "limit_exceeded",
        }
    }

    /// Tag the failure with the stage it was raised in.
    pub fn at(self, stage: Stage) -> PipelineError {
        PipelineError::Terminal { stage, error: self }
    }
}

/// Error raised by a stage pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{error}")]
    Terminal { stage: Stage, error: TerminalError },

    #[error("{stage} stage failed: {message}")]
    Stage { stage: Stage, message: String },

    #[error("unexpected error: {0}")]
    Unexpected(String),

    /// The job was cancelled while the attempt was running.
    #[error("job cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn stage(stage: Stage, err: impl fmt::Display) -> Self {
        PipelineError::Stage {
            stage,
            message: err.to_string(),
        }
    }

    /// Map a backend failure, keeping terminal classes terminal.
    pub fn acquisition(stage: Stage, err: AcquisitionError) -> Self {
        match err {
            AcquisitionError::AccessDenied(m) => TerminalError::AccessDenied(m).at(stage),
            AcquisitionError::NotFound(m) => TerminalError::NotFound(m).at(stage),
            AcquisitionError::Unsupported(m) => TerminalError::Unsupported(m).at(stage),
            AcquisitionError::LimitExceeded(m) => TerminalError::LimitExceeded(m).at(stage),
            other => PipelineError::stage(stage, other),
        }
    }

    pub fn stage_tag(&self) -> Stage {
        match self {
            PipelineError::Stage { stage, .. } | PipelineError::Terminal { stage, .. } => *stage,
            PipelineError::Unexpected(_) | PipelineError::Cancelled => Stage::Unknown,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            PipelineError::Terminal { error, .. } => error.error_type(),
            PipelineError::Stage { .. } => "stage",
            PipelineError::Unexpected(_) => "unexpected",
            PipelineError::Cancelled => "cancelled",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PipelineError::Terminal { .. } | PipelineError::Cancelled
        )
    }
}

impl From<JobError> for PipelineError {
    fn from(err: JobError) -> Self {
        PipelineError::stage(Stage::Persist, err)
    }
}

/// One attempt collapsed to what the worker needs for its retry decision.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(ArtifactResult),
    NonRetryable { stage: Stage, error: TerminalError },
    Retryable { stage: Stage, message: String },
    Cancelled,
}

impl From<Result<ArtifactResult, PipelineError>> for AttemptOutcome {
    fn from(result: Result<ArtifactResult, PipelineError>) -> Self {
        match result {
            Ok(artifact) => AttemptOutcome::Success(artifact),
            Err(PipelineError::Terminal { stage, error }) => {
                AttemptOutcome::NonRetryable { stage, error }
            }
            Err(PipelineError::Stage { stage, message }) => {
                AttemptOutcome::Retryable { stage, message }
            }
            Err(PipelineError::Unexpected(message)) => AttemptOutcome::Retryable {
                stage: Stage::Unknown,
                message,
            },
            Err(PipelineError::Cancelled) => AttemptOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_mapping() {
        let err = PipelineError::acquisition(
            Stage::Download,
            AcquisitionError::AccessDenied("private".into()),
        );
        assert!(!err.is_retryable());
        assert_eq!(err.error_type(), "access_denied");
        assert_eq!(err.stage_tag(), Stage::Download);

        let err = PipelineError::acquisition(
            Stage::Download,
            AcquisitionError::RateLimited {
                retry_after_secs: None,
            },
        );
        assert!(err.is_retryable());
        assert_eq!(err.stage_tag(), Stage::Download);
    }

    #[test]
    fn test_outcome_from_result() {
        let outcome: AttemptOutcome =
            Err(PipelineError::Unexpected("boom".to_string())).into();
        match outcome {
            AttemptOutcome::Retryable { stage, message } => {
                assert_eq!(stage, Stage::Unknown);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let outcome: AttemptOutcome =
            Err(TerminalError::LimitExceeded("too big".to_string()).at(Stage::Fetch)).into();
        assert!(matches!(
            outcome,
            AttemptOutcome::NonRetryable {
                stage: Stage::Fetch,
                error: TerminalError::LimitExceeded(_)
            }
        ));

        let outcome: AttemptOutcome = Err(PipelineError::Cancelled).into();
        assert!(matches!(outcome, AttemptOutcome::Cancelled));
    }

    #[test]
    fn test_job_error_is_persist_stage() {
        let err: PipelineError = JobError::Database("locked".to_string()).into();
        assert_eq!(err.stage_tag(), Stage::Persist);
        assert_eq!(err.to_string(), "persist stage failed: Database error: locked");
    }
}
