//! Mock source enumerator for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::collaborators::{CollaboratorError, SourceEnumerator, WorkItem};
use crate::state::SourceDescriptor;

/// Mock implementation of the SourceEnumerator trait.
///
/// Items are configured per `(category, qualifier)`; unconfigured sources
/// enumerate as empty.
#[derive(Debug, Default)]
pub struct MockSourceEnumerator {
    items: Arc<RwLock<HashMap<(String, String), Vec<WorkItem>>>>,
    /// If set, every listing fails with this error.
    error: Arc<RwLock<Option<CollaboratorError>>>,
    /// Descriptors passed to `list`, in call order.
    calls: Arc<RwLock<Vec<SourceDescriptor>>>,
}

impl MockSourceEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the items a source enumerates to.
    pub async fn set_items(&self, category: &str, qualifier: &str, items: Vec<WorkItem>) {
        self.items
            .write()
            .await
            .insert((category.to_string(), qualifier.to_string()), items);
    }

    pub async fn set_error(&self, error: Option<CollaboratorError>) {
        *self.error.write().await = error;
    }

    pub async fn calls(&self) -> Vec<SourceDescriptor> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl SourceEnumerator for MockSourceEnumerator {
    async fn list(&self, descriptor: &SourceDescriptor) -> Result<Vec<WorkItem>, CollaboratorError> {
        self.calls.write().await.push(descriptor.clone());

        if let Some(err) = self.error.read().await.clone() {
            return Err(err);
        }

        let key = (descriptor.category.clone(), descriptor.qualifier.clone());
        Ok(self.items.read().await.get(&key).cloned().unwrap_or_default())
    }
}
