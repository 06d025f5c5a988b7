//! Best-effort progress notification.
//!
//! Every subscriber reads from a bounded ring. A subscriber that falls behind
//! loses the oldest events instead of slowing the pipeline down, and
//! [`ProgressNotifier::notify`] never fails or blocks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::job::JobStatus;

/// Default per-subscriber capacity.
pub const DEFAULT_PROGRESS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub job_id: String,
    /// Status label, e.g. `downloading` or `batch:2/5`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Fan-out sink for stage transitions. Cheap to clone.
#[derive(Clone)]
pub struct ProgressNotifier {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn notify(&self, job_id: &str, status: impl Into<String>, extra: Option<String>) {
        let event = ProgressEvent {
            job_id: job_id.to_string(),
            status: status.into(),
            extra,
            timestamp: Utc::now(),
        };
        let _ = self.tx.send(event);
    }

    pub fn notify_status(&self, job_id: &str, status: JobStatus) {
        self.notify(job_id, status.as_str(), None);
    }

    pub fn subscribe(&self) -> ProgressSubscription {
        ProgressSubscription {
            rx: self.tx.subscribe(),
            dropped: 0,
            dedup: false,
            last: None,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_CAPACITY)
    }
}

/// Receiving side of one subscriber.
pub struct ProgressSubscription {
    rx: broadcast::Receiver<ProgressEvent>,
    dropped: u64,
    dedup: bool,
    last: Option<(String, String)>,
}

impl ProgressSubscription {
    /// Suppress consecutive events with the same job and status.
    pub fn dedup(mut self) -> Self {
        self.dedup = true;
        self
    }

    /// Next event, or `None` once every notifier has been dropped.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.accept(&event) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    self.dropped += n;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.accept(&event) {
                        return Some(event);
                    }
                }
                Err(TryRecvError::Lagged(n)) => {
                    self.dropped += n;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Events lost because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn accept(&mut self, event: &ProgressEvent) -> bool {
        if !self.dedup {
            return true;
        }
        let key = (event.job_id.clone(), event.status.clone());
        if self.last.as_ref() == Some(&key) {
            return false;
        }
        self.last = Some(key);
        true
    }
}
