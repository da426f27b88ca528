use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::SourceDescriptor;

/// Orchestration lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    RunStarted {
        run_id: Uuid,
        descriptor: SourceDescriptor,
    },
    RunProgress {
        run_id: Uuid,
        total: Option<u64>,
        processed: u64,
        failed: u64,
        skipped: u64,
    },
    RunCompleted {
        run_id: Uuid,
        total: u64,
        processed: u64,
        failed: u64,
        success: bool,
        /// Set when the run ended early (enumeration failure, failure threshold).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aborted_reason: Option<String>,
    },
    ItemFailed {
        run_id: Uuid,
        item_id: String,
        source_id: String,
        attempts: u32,
        message: String,
    },
    RunReset {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<Uuid>,
        processed: u64,
        failed: u64,
    },
}

impl NotificationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::RunStarted { .. } => "run_started",
            NotificationEvent::RunProgress { .. } => "run_progress",
            NotificationEvent::RunCompleted { .. } => "run_completed",
            NotificationEvent::ItemFailed { .. } => "item_failed",
            NotificationEvent::RunReset { .. } => "run_reset",
        }
    }

    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            NotificationEvent::RunStarted { run_id, .. }
            | NotificationEvent::RunProgress { run_id, .. }
            | NotificationEvent::RunCompleted { run_id, .. }
            | NotificationEvent::ItemFailed { run_id, .. } => Some(*run_id),
            NotificationEvent::RunReset { run_id, .. } => *run_id,
        }
    }
}

/// A persisted notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub orchestration_id: String,
    pub data: NotificationEvent,
}
