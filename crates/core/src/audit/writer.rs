use std::sync::Arc;

use tokio::sync::mpsc;

use super::{AuditEventEnvelope, AuditHandle, AuditRecord, AuditStore};

/// Background task that receives audit events and writes them to storage
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Consume events until every handle has been dropped.
    pub async fn run(mut self) {
        tracing::info!("Audit writer started");

        while let Some(envelope) = self.rx.recv().await {
            let record = AuditRecord {
                id: 0,
                timestamp: envelope.timestamp,
                event_type: envelope.event.event_type().to_string(),
                job_id: envelope.event.job_id().map(String::from),
                data: envelope.event,
            };

            if let Err(e) = self.store.insert(&record) {
                tracing::error!("Failed to write audit event: {}", e);
            }
        }

        tracing::info!("Audit writer shutting down");
    }
}

/// Create the handle/writer pair.
///
/// Spawn the writer with `tokio::spawn(writer.run())` and clone the handle freely.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let handle = AuditHandle::new(tx);
    let writer = AuditWriter::new(rx, store);
    (handle, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEvent, AuditFilter, SqliteAuditStore};

    #[tokio::test]
    async fn test_writer_persists_events() {
        let store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (handle, writer) = create_audit_system(store.clone(), 16);
        let task = tokio::spawn(writer.run());

        handle
            .emit(AuditEvent::JobCreated {
                job_id: "j1".to_string(),
                reference: "https://t.me/a/1".to_string(),
                kind: "collect".to_string(),
            })
            .await;
        handle
            .emit(AuditEvent::JobCompleted {
                job_id: "j1".to_string(),
                kind: "collect".to_string(),
                output_dir: "/out".to_string(),
                cached: false,
            })
            .await;
        drop(handle);
        task.await.unwrap();

        let records = store.query(&AuditFilter::new().with_job_id("j1")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(store.count(&AuditFilter::new()).unwrap(), 2);
    }
}
