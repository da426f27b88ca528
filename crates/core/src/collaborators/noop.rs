//! Collaborators used when no processing backend is configured.

use async_trait::async_trait;
use tracing::debug;

use super::{CollaboratorError, ContentProcessor, IndexRecord, IndexWriter, WorkItem};

/// Produces no records.
#[derive(Debug, Default, Clone)]
pub struct NoopContentProcessor;

#[async_trait]
impl ContentProcessor for NoopContentProcessor {
    async fn process(&self, item: &WorkItem) -> Result<Vec<IndexRecord>, CollaboratorError> {
        debug!("No backend configured, skipping processing of {}", item.item_id);
        Ok(Vec::new())
    }
}

/// Accepts every write and drops it.
#[derive(Debug, Default, Clone)]
pub struct NoopIndexWriter;

#[async_trait]
impl IndexWriter for NoopIndexWriter {
    async fn ensure_collection(&self, name: &str, dimensions: u32) -> Result<(), CollaboratorError> {
        debug!("No backend configured, ensure_collection({}, {})", name, dimensions);
        Ok(())
    }

    async fn upsert(&self, name: &str, records: &[IndexRecord]) -> Result<(), CollaboratorError> {
        debug!("No backend configured, dropping {} records for {}", records.len(), name);
        Ok(())
    }

    async fn delete_file(&self, name: &str, file_id: &str) -> Result<(), CollaboratorError> {
        debug!("No backend configured, delete_file({}, {})", name, file_id);
        Ok(())
    }

    async fn clear_collection(&self, name: &str) -> Result<(), CollaboratorError> {
        debug!("No backend configured, clear_collection({})", name);
        Ok(())
    }
}
