//! Mock content processor for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::scripted::Script;
use crate::collaborators::{CollaboratorError, ContentProcessor, IndexRecord, WorkItem};

/// Mock implementation of the ContentProcessor trait.
///
/// Produces one record per item and tracks how many calls overlap, so tests
/// can assert on effective concurrency.
#[derive(Debug, Default)]
pub struct MockContentProcessor {
    processed: Arc<RwLock<Vec<String>>>,
    script: Script,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockContentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_item(&self, item_id: &str, error: CollaboratorError) {
        self.script.fail(item_id, error, None).await;
    }

    pub async fn fail_item_times(&self, item_id: &str, error: CollaboratorError, times: u32) {
        self.script.fail(item_id, error, Some(times)).await;
    }

    pub async fn hang_item(&self, item_id: &str) {
        self.script.hang(item_id).await;
    }

    pub async fn set_delay(&self, delay: Option<Duration>) {
        self.script.set_delay(delay).await;
    }

    pub async fn processed(&self) -> Vec<String> {
        self.processed.read().await.clone()
    }

    /// Highest number of concurrent `process` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn record_for(item: &WorkItem) -> IndexRecord {
        IndexRecord {
            record_id: format!("{}#0", item.item_id),
            file_id: item.item_id.clone(),
            content: format!("content of {}", item.item_id),
            metadata: serde_json::json!({ "source_id": item.source_id }),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentProcessor for MockContentProcessor {
    async fn process(&self, item: &WorkItem) -> Result<Vec<IndexRecord>, CollaboratorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        self.script.play(&item.item_id).await?;
        self.processed.write().await.push(item.item_id.clone());
        Ok(vec![Self::record_for(item)])
    }
}
