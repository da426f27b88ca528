use async_trait::async_trait;

use super::{NotificationRecord, NotifyError};

/// Receives every persisted notification.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, record: &NotificationRecord) -> Result<(), NotifyError>;
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn publish(&self, record: &NotificationRecord) -> Result<(), NotifyError> {
        let data = serde_json::to_string(&record.data)
            .map_err(|e| NotifyError::Serialization(e.to_string()))?;
        tracing::info!(
            kind = %record.kind,
            orchestration_id = %record.orchestration_id,
            "notification: {}",
            data
        );
        Ok(())
    }
}
