use std::sync::Arc;

use tokio::sync::mpsc;

use super::{NotificationEnvelope, NotificationRecord, NotificationSink, NotificationStore, NotifyHandle};
use crate::metrics;

/// Background task that persists notifications and fans them out to sinks
pub struct NotificationDispatcher {
    rx: mpsc::Receiver<NotificationEnvelope>,
    store: Arc<dyn NotificationStore>,
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl NotificationDispatcher {
    pub fn new(
        rx: mpsc::Receiver<NotificationEnvelope>,
        store: Arc<dyn NotificationStore>,
        sinks: Vec<Arc<dyn NotificationSink>>,
    ) -> Self {
        Self { rx, store, sinks }
    }

    /// Consume events until every `NotifyHandle` is dropped.
    ///
    /// Spawn this as a background task.
    pub async fn run(mut self) {
        tracing::info!("Notification dispatcher started");

        while let Some(envelope) = self.rx.recv().await {
            let mut record = NotificationRecord {
                id: 0, // assigned by the store
                timestamp: envelope.timestamp,
                kind: envelope.event.kind().to_string(),
                orchestration_id: envelope.orchestration_id.to_string(),
                data: envelope.event,
            };

            match self.store.insert(&record) {
                Ok(id) => record.id = id,
                Err(e) => tracing::error!("Failed to persist notification: {}", e),
            }

            for sink in &self.sinks {
                if let Err(e) = sink.publish(&record).await {
                    tracing::warn!("Notification sink failed for {}: {}", record.kind, e);
                }
            }

            metrics::NOTIFICATIONS_DISPATCHED
                .with_label_values(&[&record.kind])
                .inc();
        }

        tracing::info!("Notification dispatcher shutting down");
    }
}

/// Create a complete notification system
///
/// Returns the handle to clone into controllers and the dispatcher to spawn
/// with `tokio::spawn(dispatcher.run())`.
pub fn create_notification_system(
    store: Arc<dyn NotificationStore>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    buffer_size: usize,
) -> (NotifyHandle, NotificationDispatcher) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    (NotifyHandle::new(tx), NotificationDispatcher::new(rx, store, sinks))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::key::OrchestrationKey;
    use crate::notify::{NotificationEvent, NotificationFilter, NotifyError, SqliteNotificationStore};

    struct CollectingSink {
        seen: Mutex<Vec<NotificationRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for CollectingSink {
        async fn publish(&self, record: &NotificationRecord) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(record.clone());
            if self.fail {
                return Err(NotifyError::Sink("down".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatcher_persists_and_fans_out() {
        let store = Arc::new(SqliteNotificationStore::in_memory().unwrap());
        let failing = Arc::new(CollectingSink {
            seen: Mutex::new(Vec::new()),
            fail: true,
        });
        let healthy = Arc::new(CollectingSink {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });

        let (handle, dispatcher) = create_notification_system(
            store.clone(),
            vec![failing.clone(), healthy.clone()],
            10,
        );
        let task = tokio::spawn(dispatcher.run());

        let key = OrchestrationKey::derive("blobs", "x");
        handle
            .emit(
                &key,
                NotificationEvent::RunStarted {
                    run_id: Uuid::new_v4(),
                    descriptor: crate::state::SourceDescriptor::new("blobs", "x"),
                },
            )
            .await;

        drop(handle);
        task.await.unwrap();

        let stored = store.query(&NotificationFilter::new()).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].orchestration_id, key.to_string());

        // a failing sink doesn't stop the others
        assert_eq!(failing.seen.lock().unwrap().len(), 1);
        let seen = healthy.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, stored[0].id);
    }
}
