//! Coordinator types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// A granted share of a category's capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub lease_id: Uuid,
    pub request_id: String,
    pub category: String,
    pub weight: u32,
    pub acquired_at: DateTime<Utc>,
    pub ttl: Duration,
}

/// Point-in-time view of one coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinatorStatus {
    pub category: String,
    pub capacity: u32,
    pub active_weight: u32,
    pub active_leases: usize,
    pub queue_length: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("weight {weight} exceeds capacity {capacity} of category '{category}'")]
    WeightExceedsCapacity {
        category: String,
        weight: u32,
        capacity: u32,
    },

    #[error("no capacity available in category '{category}' for request '{request_id}'")]
    Backpressure {
        category: String,
        request_id: String,
    },

    #[error("unknown coordinator category '{0}'")]
    UnknownCategory(String),
}
