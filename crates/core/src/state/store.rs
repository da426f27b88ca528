//! State store trait.

use thiserror::Error;

use super::{ItemState, OrchestrationState};
use crate::key::OrchestrationKey;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt record {id}: {message}")]
    Corrupt { id: String, message: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Filter for listing item states.
#[derive(Debug, Clone)]
pub struct ItemFilter {
    /// Filter by phase name (e.g. "failed").
    pub phase: Option<String>,
    /// Filter by run.
    pub run_id: Option<uuid::Uuid>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ItemFilter {
    fn default() -> Self {
        Self {
            phase: None,
            run_id: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl ItemFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_run_id(mut self, run_id: uuid::Uuid) -> Self {
        self.run_id = Some(run_id);
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

/// Durable key → state storage.
///
/// Writes for one key only come from that key's controller and its workers.
pub trait StateStore: Send + Sync {
    fn load_orchestration(
        &self,
        key: &OrchestrationKey,
    ) -> Result<Option<OrchestrationState>, StoreError>;

    /// Insert or replace.
    fn save_orchestration(&self, state: &OrchestrationState) -> Result<(), StoreError>;

    /// All orchestrations, most recently updated first.
    fn list_orchestrations(&self) -> Result<Vec<OrchestrationState>, StoreError>;

    fn load_item(
        &self,
        key: &OrchestrationKey,
        item_id: &str,
    ) -> Result<Option<ItemState>, StoreError>;

    /// Insert or replace.
    fn save_item(&self, item: &ItemState) -> Result<(), StoreError>;

    fn list_items(
        &self,
        key: &OrchestrationKey,
        filter: &ItemFilter,
    ) -> Result<Vec<ItemState>, StoreError>;
}
