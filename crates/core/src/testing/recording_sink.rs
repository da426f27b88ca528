//! Notification sink that records what it receives.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};

use crate::notify::{NotificationRecord, NotificationSink, NotifyError};

#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Arc<RwLock<Vec<NotificationRecord>>>,
    notify: Notify,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<NotificationRecord> {
        self.records.read().await.clone()
    }

    pub async fn kinds(&self) -> Vec<String> {
        self.records
            .read()
            .await
            .iter()
            .map(|r| r.kind.clone())
            .collect()
    }

    pub async fn count(&self, kind: &str) -> usize {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    /// Wait until at least `count` records of `kind` arrived.
    ///
    /// Returns false if `timeout` elapses first.
    pub async fn wait_for(&self, kind: &str, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.count(kind).await >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, record: &NotificationRecord) -> Result<(), NotifyError> {
        self.records.write().await.push(record.clone());
        self.notify.notify_waiters();
        Ok(())
    }
}
