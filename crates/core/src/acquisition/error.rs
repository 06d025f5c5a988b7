use thiserror::Error;

/// Failure reported by an acquisition backend.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("content not found: {0}")]
    NotFound(String),

    #[error("unsupported content: {0}")]
    Unsupported(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("rate limited{}", .retry_after_secs.map(|s| format!(", retry after {}s", s)).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl AcquisitionError {
    /// Failures that will never succeed on retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AcquisitionError::AccessDenied(_)
                | AcquisitionError::NotFound(_)
                | AcquisitionError::Unsupported(_)
                | AcquisitionError::LimitExceeded(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classes() {
        assert!(AcquisitionError::AccessDenied("x".into()).is_terminal());
        assert!(AcquisitionError::NotFound("x".into()).is_terminal());
        assert!(AcquisitionError::Unsupported("x".into()).is_terminal());
        assert!(AcquisitionError::LimitExceeded("x".into()).is_terminal());
        assert!(!AcquisitionError::RateLimited {
            retry_after_secs: Some(5)
        }
        .is_terminal());
        assert!(!AcquisitionError::Connection("reset".into()).is_terminal());
        assert!(!AcquisitionError::Other("x".into()).is_terminal());
    }

    #[test]
    fn test_rate_limited_display() {
        let err = AcquisitionError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert_eq!(err.to_string(), "rate limited, retry after 30s");
        let err = AcquisitionError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(err.to_string(), "rate limited");
    }
}
