//! Types for orchestration controllers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::OrchestratorConfig;
use crate::collaborators::{ContentProcessor, IndexWriter, ItemCopier, SourceEnumerator};
use crate::coordinator::{CoordinatorError, CoordinatorRegistry};
use crate::key::OrchestrationKey;
use crate::notify::NotifyHandle;
use crate::state::{StateStore, StoreError};

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Controller refuses new runs.
    #[error("orchestration {0} is deactivated")]
    Deactivated(OrchestrationKey),

    #[error("invalid source descriptor: {0}")]
    InvalidDescriptor(String),

    /// Descriptor hashes to a different key than the controller's.
    #[error("descriptor key {actual} does not match orchestration {expected}")]
    KeyMismatch {
        expected: OrchestrationKey,
        actual: OrchestrationKey,
    },

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),
}

/// Result of `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// What a stuck-item sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Unsettled items inspected.
    pub checked: usize,
    pub requeued: Vec<String>,
    pub failed: Vec<String>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

/// External collaborators a run drives.
#[derive(Clone)]
pub struct Collaborators {
    pub enumerator: Arc<dyn SourceEnumerator>,
    pub copier: Arc<dyn ItemCopier>,
    pub processor: Arc<dyn ContentProcessor>,
    pub index: Arc<dyn IndexWriter>,
}

/// Dependencies shared by every controller in a registry.
#[derive(Clone)]
pub struct ControllerDeps {
    pub config: OrchestratorConfig,
    /// Dimensions passed to `ensure_collection` in reindex mode.
    pub index_dimensions: u32,
    pub store: Arc<dyn StateStore>,
    pub coordinators: Arc<CoordinatorRegistry>,
    pub collaborators: Collaborators,
    pub notify: NotifyHandle,
}
