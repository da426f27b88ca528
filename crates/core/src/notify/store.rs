use chrono::{DateTime, Utc};
use thiserror::Error;

use super::NotificationRecord;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sink error: {0}")]
    Sink(String),
}

/// Filter for querying the notification log
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub orchestration_id: Option<String>,
    pub kind: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl NotificationFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            offset: 0,
            ..Default::default()
        }
    }

    pub fn with_orchestration_id(mut self, id: impl Into<String>) -> Self {
        self.orchestration_id = Some(id.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_time_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Notification log storage
pub trait NotificationStore: Send + Sync {
    /// Insert a record, returns the assigned ID
    fn insert(&self, record: &NotificationRecord) -> Result<i64, NotifyError>;

    /// Newest first
    fn query(&self, filter: &NotificationFilter) -> Result<Vec<NotificationRecord>, NotifyError>;

    fn count(&self, filter: &NotificationFilter) -> Result<i64, NotifyError>;
}
