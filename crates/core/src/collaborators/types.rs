use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One unit of work produced by enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable within the source (e.g. relative path).
    pub item_id: String,
    /// Where the bytes live (e.g. absolute path or URL).
    pub item_ref: String,
    pub content_hash: String,
    pub source_id: String,
}

/// A record written to the index for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub record_id: String,
    /// Item the record was produced from; used by `delete_file`.
    pub file_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Worth retrying: timeouts, dependency unavailable.
    #[error("transient: {0}")]
    Transient(String),

    /// Not worth retrying: explicit rejection, unsupported content.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl CollaboratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CollaboratorError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            CollaboratorError::Transient(m) | CollaboratorError::Permanent(m) => m,
        }
    }
}
