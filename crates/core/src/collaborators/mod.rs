//! External collaborators an orchestration drives.
//!
//! The engine only schedules, throttles, and tracks work; listing items,
//! copying bytes, extracting records, and writing the index are delegated
//! to these traits.

mod fs;
mod http;
mod noop;
mod types;

pub use fs::{FsItemCopier, FsSourceEnumerator};
pub use http::{HttpContentProcessor, HttpIndexWriter};
pub use noop::{NoopContentProcessor, NoopIndexWriter};
pub use types::{CollaboratorError, IndexRecord, WorkItem};

use async_trait::async_trait;

use crate::state::SourceDescriptor;

/// Lists the items that make up a source.
#[async_trait]
pub trait SourceEnumerator: Send + Sync {
    async fn list(&self, descriptor: &SourceDescriptor) -> Result<Vec<WorkItem>, CollaboratorError>;
}

/// Copies an item somewhere the processor can read it.
#[async_trait]
pub trait ItemCopier: Send + Sync {
    async fn copy(&self, item: &WorkItem) -> Result<(), CollaboratorError>;
}

/// Turns an item into index records.
#[async_trait]
pub trait ContentProcessor: Send + Sync {
    async fn process(&self, item: &WorkItem) -> Result<Vec<IndexRecord>, CollaboratorError>;
}

/// Writes records to a named collection.
#[async_trait]
pub trait IndexWriter: Send + Sync {
    async fn ensure_collection(&self, name: &str, dimensions: u32) -> Result<(), CollaboratorError>;

    async fn upsert(&self, name: &str, records: &[IndexRecord]) -> Result<(), CollaboratorError>;

    /// Remove every record previously written for `file_id`.
    async fn delete_file(&self, name: &str, file_id: &str) -> Result<(), CollaboratorError>;

    async fn clear_collection(&self, name: &str) -> Result<(), CollaboratorError>;
}
