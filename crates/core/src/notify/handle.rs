use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::NotificationEvent;
use crate::key::OrchestrationKey;
use crate::metrics;

/// Envelope wrapping a notification with its origin and time
#[derive(Debug, Clone)]
pub struct NotificationEnvelope {
    pub timestamp: DateTime<Utc>,
    pub orchestration_id: OrchestrationKey,
    pub event: NotificationEvent,
}

/// Handle for emitting notifications
///
/// Cheap to clone. Events go through a bounded channel to the
/// `NotificationDispatcher`; `emit` waits while the channel is full, and a
/// closed channel is logged, never surfaced to the caller.
#[derive(Clone)]
pub struct NotifyHandle {
    tx: mpsc::Sender<NotificationEnvelope>,
}

impl NotifyHandle {
    pub fn new(tx: mpsc::Sender<NotificationEnvelope>) -> Self {
        Self { tx }
    }

    pub async fn emit(&self, orchestration_id: &OrchestrationKey, event: NotificationEvent) {
        let envelope = NotificationEnvelope {
            timestamp: Utc::now(),
            orchestration_id: orchestration_id.clone(),
            event,
        };
        if let Err(e) = self.tx.send(envelope).await {
            metrics::NOTIFICATIONS_DROPPED.inc();
            tracing::error!("Failed to emit notification: {}", e);
        }
    }
}
