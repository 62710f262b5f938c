//! In-process event bus backed by a `tokio::sync::broadcast` channel.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tessera_core::lifecycle::JobStatus;
use tessera_core::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// Event names for terminal job transitions.
pub mod event_types {
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_FAILED: &str = "job.failed";
    pub const JOB_CANCELLED: &str = "job.cancelled";
}

/// A terminal job transition, as published on the bus and delivered to
/// webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Dot-separated event name, e.g. `"job.completed"`.
    pub event: String,
    pub job_id: JobId,
    pub status: JobStatus,
    pub timestamp: Timestamp,
    /// The job record plus its artifacts, as shown by the status endpoint.
    pub data: serde_json::Value,
    /// Delivery target registered at job creation, if any. Not part of the
    /// webhook body.
    #[serde(skip)]
    pub webhook_url: Option<String>,
}

impl JobEvent {
    pub fn new(status: JobStatus, job_id: JobId, data: serde_json::Value) -> Self {
        let event = match status {
            JobStatus::Completed => event_types::JOB_COMPLETED,
            JobStatus::Failed => event_types::JOB_FAILED,
            _ => event_types::JOB_CANCELLED,
        };
        Self {
            event: event.to_string(),
            job_id,
            status,
            timestamp: chrono::Utc::now(),
            data,
            webhook_url: None,
        }
    }

    pub fn with_webhook_url(mut self, url: Option<String>) -> Self {
        self.webhook_url = url;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so any number of subscribers can
/// independently receive every published [`JobEvent`].
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed messages are dropped
    /// and slow receivers observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: JobEvent) {
        // Ignore the SendError — it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Create a new subscription receiving every event published after this
    /// call.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::types::JobId;

    fn event(status: JobStatus) -> JobEvent {
        JobEvent::new(status, JobId::new_v4(), serde_json::json!({"job": {}}))
    }

    #[test]
    fn event_type_follows_terminal_status() {
        assert_eq!(event(JobStatus::Completed).event, "job.completed");
        assert_eq!(event(JobStatus::Failed).event, "job.failed");
        assert_eq!(event(JobStatus::Cancelled).event, "job.cancelled");
    }

    #[test]
    fn webhook_url_is_not_serialized() {
        let e = event(JobStatus::Completed).with_webhook_url(Some("http://x".into()));
        let json = serde_json::to_value(&e).unwrap();
        assert!(json.get("webhook_url").is_none());
        assert_eq!(json["event"], "job.completed");
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(event(JobStatus::Completed));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event, "job.completed");
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        EventBus::default().publish(event(JobStatus::Failed));
    }
}
