//! Orchestration and item state types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::key::OrchestrationKey;

/// How a run treats items that were already indexed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Skip items whose content hash is unchanged since they last completed.
    #[default]
    Ingest,
    /// Clear the target collection and process every item.
    Reindex,
}

/// What to run: one logical source plus how to treat it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub category: String,
    pub qualifier: String,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default)]
    pub reason: String,
}

impl SourceDescriptor {
    pub fn new(category: impl Into<String>, qualifier: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            qualifier: qualifier.into(),
            mode: RunMode::Ingest,
            collection: None,
            reason: String::new(),
        }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn key(&self) -> OrchestrationKey {
        OrchestrationKey::derive(&self.category, &self.qualifier)
    }

    /// Target collection; defaults to `category_qualifier` with anything
    /// outside `[a-z0-9_-]` replaced by `_`.
    pub fn collection_name(&self) -> String {
        if let Some(ref name) = self.collection {
            return name.clone();
        }
        format!("{}_{}", self.category, self.qualifier)
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Returns a description of the first problem found, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.category.trim().is_empty() {
            return Err("category cannot be empty".to_string());
        }
        if self.qualifier.trim().is_empty() {
            return Err("qualifier cannot be empty".to_string());
        }
        if let Some(ref c) = self.collection {
            if c.trim().is_empty() {
                return Err("collection cannot be blank".to_string());
            }
        }
        Ok(())
    }
}

/// Per-source counters within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProgress {
    pub source_id: String,
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
}

/// An error recorded against a run. `item_id` is empty for run-level errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub item_id: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Durable record owned by one orchestration controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub id: OrchestrationKey,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<SourceDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// Unknown until enumeration finishes.
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub failed: u64,
    /// Subset of `processed` counted because the content was unchanged.
    #[serde(default)]
    pub skipped: u64,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<SourceProgress>,
    #[serde(default)]
    pub errors: Vec<RunError>,
}

impl OrchestrationState {
    pub fn new(id: OrchestrationKey) -> Self {
        Self {
            id,
            reason: String::new(),
            descriptor: None,
            run_id: None,
            total: None,
            processed: 0,
            failed: 0,
            skipped: 0,
            running: false,
            started_at: None,
            completed_at: None,
            last_updated: Utc::now(),
            sources: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Number of items that reached a terminal outcome in this run.
    pub fn settled(&self) -> u64 {
        self.processed + self.failed
    }

    /// True once the total is known and every item has settled.
    pub fn is_finished(&self) -> bool {
        self.total.is_some_and(|total| self.settled() >= total)
    }

    /// Counters for `source_id`, created in first-appearance order.
    pub fn source_mut(&mut self, source_id: &str) -> &mut SourceProgress {
        let idx = match self.sources.iter().position(|s| s.source_id == source_id) {
            Some(idx) => idx,
            None => {
                self.sources.push(SourceProgress {
                    source_id: source_id.to_string(),
                    total: 0,
                    processed: 0,
                    failed: 0,
                });
                self.sources.len() - 1
            }
        };
        &mut self.sources[idx]
    }

    pub fn record_error(&mut self, item_id: impl Into<String>, message: impl Into<String>) {
        self.errors.push(RunError {
            item_id: item_id.into(),
            message: message.into(),
            at: Utc::now(),
        });
    }
}

/// Per-item phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemPhase {
    Queued,
    Copying,
    Processing,
    Indexing,
    Complete,
    Failed { reason: String },
}

impl ItemPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemPhase::Complete | ItemPhase::Failed { .. })
    }

    /// Phases entered only after a lease was granted.
    pub fn holds_lease(&self) -> bool {
        matches!(
            self,
            ItemPhase::Copying | ItemPhase::Processing | ItemPhase::Indexing
        )
    }

    /// Forward order only; any non-terminal phase may fail.
    /// `failed -> queued` is the controller's requeue path.
    pub fn can_transition_to(&self, next: &ItemPhase) -> bool {
        use ItemPhase::*;
        match (self, next) {
            (Queued, Copying) | (Copying, Processing) | (Processing, Indexing) => true,
            (Indexing, Complete) => true,
            (Failed { .. }, Queued) => true,
            (from, Failed { .. }) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ItemPhase::Queued => "queued",
            ItemPhase::Copying => "copying",
            ItemPhase::Processing => "processing",
            ItemPhase::Indexing => "indexing",
            ItemPhase::Complete => "complete",
            ItemPhase::Failed { .. } => "failed",
        }
    }
}

/// Durable record for one item of one orchestration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemState {
    pub id: String,
    pub orchestration_id: OrchestrationKey,
    pub run_id: Uuid,
    pub item_ref: String,
    pub source_id: String,
    pub content_hash: String,
    pub phase: ItemPhase,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub last_activity: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_default_collection_is_sanitized() {
        let d = SourceDescriptor::new("blobs", "Incoming/Batch 1");
        assert_eq!(d.collection_name(), "blobs_incoming_batch_1");

        let d = d.with_collection("custom");
        assert_eq!(d.collection_name(), "custom");
    }

    #[test]
    fn test_descriptor_validate() {
        assert!(SourceDescriptor::new("blobs", "x").validate().is_ok());
        assert!(SourceDescriptor::new("", "x").validate().is_err());
        assert!(SourceDescriptor::new("blobs", "  ").validate().is_err());
        assert!(SourceDescriptor::new("blobs", "x")
            .with_collection(" ")
            .validate()
            .is_err());
    }

    #[test]
    fn test_descriptor_deserialize_defaults() {
        let d: SourceDescriptor =
            serde_json::from_str(r#"{"category":"blobs","qualifier":"x"}"#).unwrap();
        assert_eq!(d.mode, RunMode::Ingest);
        assert!(d.collection.is_none());
        assert_eq!(d.key(), OrchestrationKey::derive("blobs", "x"));
    }

    #[test]
    fn test_source_mut_keeps_first_appearance_order() {
        let mut state = OrchestrationState::new(OrchestrationKey::derive("a", "b"));
        state.source_mut("beta").total += 1;
        state.source_mut("alpha").total += 1;
        state.source_mut("beta").total += 1;

        let ids: Vec<_> = state.sources.iter().map(|s| s.source_id.as_str()).collect();
        assert_eq!(ids, vec!["beta", "alpha"]);
        assert_eq!(state.sources[0].total, 2);
    }

    #[test]
    fn test_is_finished_requires_known_total() {
        let mut state = OrchestrationState::new(OrchestrationKey::derive("a", "b"));
        assert!(!state.is_finished());
        state.total = Some(2);
        state.processed = 1;
        assert!(!state.is_finished());
        state.failed = 1;
        assert!(state.is_finished());
    }

    #[test]
    fn test_phase_transitions() {
        use ItemPhase::*;
        assert!(Queued.can_transition_to(&Copying));
        assert!(Copying.can_transition_to(&Processing));
        assert!(Processing.can_transition_to(&Indexing));
        assert!(Indexing.can_transition_to(&Complete));
        assert!(Queued.can_transition_to(&Failed {
            reason: "x".into()
        }));
        assert!(Failed {
            reason: "x".into()
        }
        .can_transition_to(&Queued));

        assert!(!Queued.can_transition_to(&Processing));
        assert!(!Copying.can_transition_to(&Complete));
        assert!(!Complete.can_transition_to(&Failed {
            reason: "x".into()
        }));
        assert!(!Complete.can_transition_to(&Queued));
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&ItemPhase::Failed {
            reason: "boom".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"failed","reason":"boom"}"#);
        assert_eq!(
            serde_json::to_string(&ItemPhase::Queued).unwrap(),
            r#"{"type":"queued"}"#
        );
    }

    #[test]
    fn test_holds_lease() {
        assert!(!ItemPhase::Queued.holds_lease());
        assert!(ItemPhase::Copying.holds_lease());
        assert!(ItemPhase::Indexing.holds_lease());
        assert!(!ItemPhase::Complete.holds_lease());
    }
}
