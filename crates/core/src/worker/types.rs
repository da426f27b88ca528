//! Types shared between item workers and their owner.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::collaborators::{CollaboratorError, ContentProcessor, IndexWriter, ItemCopier};
use crate::coordinator::{ConcurrencyCoordinator, CoordinatorError, Lease};
use crate::key::OrchestrationKey;
use crate::orchestrator::OrchestratorConfig;
use crate::state::{StateStore, StoreError};

/// Coordinator request id for an item's lease. Stable across attempts.
pub fn lease_request_id(key: &OrchestrationKey, item_id: &str) -> String {
    format!("ingest:{}:{}", key, item_id)
}

/// Terminal report from one item attempt.
///
/// `lease` is the lease the worker still holds, handed back so the owner
/// releases it; `None` when no lease was acquired.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub item_id: String,
    pub run_id: Uuid,
    pub attempt: u32,
    pub lease: Option<Lease>,
}

/// Why an item attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub message: String,
    pub transient: bool,
}

impl ItemFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

impl From<CollaboratorError> for ItemFailure {
    fn from(e: CollaboratorError) -> Self {
        Self {
            transient: e.is_transient(),
            message: e.to_string(),
        }
    }
}

impl From<&WorkerError> for ItemFailure {
    fn from(e: &WorkerError) -> Self {
        let transient = matches!(
            e,
            WorkerError::LeaseUnavailable { .. } | WorkerError::Store(_)
        );
        Self {
            message: e.to_string(),
            transient,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("illegal transition {from} -> {to} for item {item_id}")]
    IllegalTransition {
        item_id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("no lease after {attempts} attempts: {source}")]
    LeaseUnavailable {
        attempts: u32,
        source: CoordinatorError,
    },

    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("run halted")]
    Halted,
}

/// Receives each worker's single terminal outcome.
#[async_trait]
pub trait ItemOwner: Send + Sync {
    async fn on_item_completed(&self, outcome: ItemOutcome);

    async fn on_item_failed(&self, outcome: ItemOutcome, failure: ItemFailure);
}

/// Where a worker keeps its lease, shared with the owner so an aborted
/// worker's lease can still be released.
#[derive(Debug, Clone, Default)]
pub struct LeaseSlot(Arc<Mutex<Option<Lease>>>);

impl LeaseSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, lease: Lease) {
        let mut slot = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(lease);
    }

    pub fn take(&self) -> Option<Lease> {
        let mut slot = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take()
    }

    pub fn is_held(&self) -> bool {
        match self.0.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }
}

/// Everything a worker needs beyond its item.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: OrchestratorConfig,
    pub store: Arc<dyn StateStore>,
    pub coordinator: Arc<ConcurrencyCoordinator>,
    pub copier: Arc<dyn ItemCopier>,
    pub processor: Arc<dyn ContentProcessor>,
    pub index: Arc<dyn IndexWriter>,
    pub owner: Arc<dyn ItemOwner>,
    /// Target collection for the indexing phase.
    pub collection: String,
    /// Flips to true (or closes) when the run is halted.
    pub halt: watch::Receiver<bool>,
}
