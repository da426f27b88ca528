//! Mock index writer for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::collaborators::{CollaboratorError, IndexRecord, IndexWriter};

/// Mock implementation of the IndexWriter trait.
///
/// Keeps collections in memory keyed by name.
#[derive(Debug, Default)]
pub struct MockIndexWriter {
    collections: Arc<RwLock<HashMap<String, Vec<IndexRecord>>>>,
    deleted: Arc<RwLock<HashMap<String, Vec<String>>>>,
    /// `(name, dimensions)` for every `ensure_collection` call.
    ensured: Arc<RwLock<Vec<(String, u32)>>>,
    cleared: Arc<RwLock<Vec<String>>>,
    /// If set, every write fails with this error.
    error: Arc<RwLock<Option<CollaboratorError>>>,
}

impl MockIndexWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_error(&self, error: Option<CollaboratorError>) {
        *self.error.write().await = error;
    }

    pub async fn records(&self, collection: &str) -> Vec<IndexRecord> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn deleted_files(&self, collection: &str) -> Vec<String> {
        self.deleted
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn ensured(&self) -> Vec<(String, u32)> {
        self.ensured.read().await.clone()
    }

    pub async fn cleared(&self) -> Vec<String> {
        self.cleared.read().await.clone()
    }

    async fn check(&self) -> Result<(), CollaboratorError> {
        match self.error.read().await.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IndexWriter for MockIndexWriter {
    async fn ensure_collection(&self, name: &str, dimensions: u32) -> Result<(), CollaboratorError> {
        self.check().await?;
        self.ensured.write().await.push((name.to_string(), dimensions));
        self.collections
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn upsert(&self, name: &str, records: &[IndexRecord]) -> Result<(), CollaboratorError> {
        self.check().await?;
        let mut collections = self.collections.write().await;
        let collection = collections.entry(name.to_string()).or_default();
        for record in records {
            collection.retain(|r| r.record_id != record.record_id);
            collection.push(record.clone());
        }
        Ok(())
    }

    async fn delete_file(&self, name: &str, file_id: &str) -> Result<(), CollaboratorError> {
        self.check().await?;
        if let Some(collection) = self.collections.write().await.get_mut(name) {
            collection.retain(|r| r.file_id != file_id);
        }
        self.deleted
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .push(file_id.to_string());
        Ok(())
    }

    async fn clear_collection(&self, name: &str) -> Result<(), CollaboratorError> {
        self.check().await?;
        self.cleared.write().await.push(name.to_string());
        if let Some(collection) = self.collections.write().await.get_mut(name) {
            collection.clear();
        }
        Ok(())
    }
}
