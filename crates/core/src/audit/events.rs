use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Job lifecycle
    JobCreated {
        job_id: String,
        reference: String,
        kind: String,
    },
    JobStatusChanged {
        job_id: String,
        from_status: String,
        to_status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    AttemptFailed {
        job_id: String,
        attempt: u32,
        stage: String,
        error_type: String,
        message: String,
        retryable: bool,
    },
    JobCompleted {
        job_id: String,
        kind: String,
        output_dir: String,
        /// Completed from an existing completion marker.
        cached: bool,
    },

    // Batches
    BatchStarted {
        topic: String,
        total: usize,
    },
    BatchCompleted {
        topic: String,
        total: usize,
        succeeded: usize,
        failed: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index_dir: Option<String>,
    },
}

impl AuditEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::ServiceStarted { .. } => "service_started",
            AuditEvent::ServiceStopped { .. } => "service_stopped",
            AuditEvent::JobCreated { .. } => "job_created",
            AuditEvent::JobStatusChanged { .. } => "job_status_changed",
            AuditEvent::AttemptFailed { .. } => "attempt_failed",
            AuditEvent::JobCompleted { .. } => "job_completed",
            AuditEvent::BatchStarted { .. } => "batch_started",
            AuditEvent::BatchCompleted { .. } => "batch_completed",
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            AuditEvent::JobCreated { job_id, .. }
            | AuditEvent::JobStatusChanged { job_id, .. }
            | AuditEvent::AttemptFailed { job_id, .. }
            | AuditEvent::JobCompleted { job_id, .. } => Some(job_id),
            AuditEvent::ServiceStarted { .. }
            | AuditEvent::ServiceStopped { .. }
            | AuditEvent::BatchStarted { .. }
            | AuditEvent::BatchCompleted { .. } => None,
        }
    }
}

/// Stored audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub job_id: Option<String>,
    pub data: AuditEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_and_job_id() {
        let event = AuditEvent::AttemptFailed {
            job_id: "j1".to_string(),
            attempt: 2,
            stage: "download".to_string(),
            error_type: "stage".to_string(),
            message: "timeout".to_string(),
            retryable: true,
        };
        assert_eq!(event.event_type(), "attempt_failed");
        assert_eq!(event.job_id(), Some("j1"));

        let event = AuditEvent::BatchStarted {
            topic: "t".to_string(),
            total: 3,
        };
        assert_eq!(event.event_type(), "batch_started");
        assert_eq!(event.job_id(), None);
    }

    #[test]
    fn test_serialization_is_tagged() {
        let event = AuditEvent::JobStatusChanged {
            job_id: "j1".to_string(),
            from_status: "pending".to_string(),
            to_status: "error".to_string(),
            reason: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"job_status_changed\""));
        assert!(!json.contains("reason"));

        let back: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
