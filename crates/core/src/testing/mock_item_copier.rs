//! Mock item copier for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::scripted::Script;
use crate::collaborators::{CollaboratorError, ItemCopier, WorkItem};

/// Mock implementation of the ItemCopier trait.
///
/// Records the id of every item copied successfully.
#[derive(Debug, Default)]
pub struct MockItemCopier {
    copied: Arc<RwLock<Vec<String>>>,
    script: Script,
}

impl MockItemCopier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every copy of `item_id` fails with `error`.
    pub async fn fail_item(&self, item_id: &str, error: CollaboratorError) {
        self.script.fail(item_id, error, None).await;
    }

    /// The next `times` copies of `item_id` fail with `error`.
    pub async fn fail_item_times(&self, item_id: &str, error: CollaboratorError, times: u32) {
        self.script.fail(item_id, error, Some(times)).await;
    }

    /// Copies of `item_id` never return.
    pub async fn hang_item(&self, item_id: &str) {
        self.script.hang(item_id).await;
    }

    pub async fn set_delay(&self, delay: Option<Duration>) {
        self.script.set_delay(delay).await;
    }

    pub async fn copied(&self) -> Vec<String> {
        self.copied.read().await.clone()
    }
}

#[async_trait]
impl ItemCopier for MockItemCopier {
    async fn copy(&self, item: &WorkItem) -> Result<(), CollaboratorError> {
        self.script.play(&item.item_id).await?;
        self.copied.write().await.push(item.item_id.clone());
        Ok(())
    }
}
