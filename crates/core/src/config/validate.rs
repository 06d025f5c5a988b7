use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Attempt budget and size/duration ceilings are nonzero
/// - Backoff is a finite, non-negative number
/// - Output and temp directories are set
/// - Summarization has credentials when enabled
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let pipeline = &config.pipeline;

    if pipeline.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.max_attempts cannot be 0".to_string(),
        ));
    }

    if !pipeline.retry_backoff_secs.is_finite() || pipeline.retry_backoff_secs < 0.0 {
        return Err(ConfigError::ValidationError(
            "pipeline.retry_backoff_secs must be a non-negative number".to_string(),
        ));
    }

    if pipeline.max_duration_secs == 0 || pipeline.max_file_mb == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline limits cannot be 0".to_string(),
        ));
    }

    if pipeline.output_dir.as_os_str().is_empty() || pipeline.temp_dir.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "pipeline.output_dir and pipeline.temp_dir must be set".to_string(),
        ));
    }

    if pipeline.summarize {
        match &config.summarizer {
            None => {
                return Err(ConfigError::ValidationError(
                    "pipeline.summarize requires a [summarizer] section".to_string(),
                ))
            }
            Some(s) if s.api_key.trim().is_empty() => {
                return Err(ConfigError::ValidationError(
                    "summarizer.api_key cannot be empty".to_string(),
                ))
            }
            Some(_) => {}
        }
    }

    if config.audit.buffer_size == 0 {
        return Err(ConfigError::ValidationError(
            "audit.buffer_size cannot be 0".to_string(),
        ));
    }

    Ok(())
}
