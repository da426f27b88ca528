use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sluice_core::notify::{NotificationFilter, NotificationRecord};

use super::handlers::{error_response, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for notification queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for notification queries
const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for the notification log
#[derive(Debug, Deserialize)]
pub struct NotificationQueryParams {
    /// Filter by orchestration key
    pub orchestration_id: Option<String>,
    /// Filter by kind (e.g. "run_completed")
    pub kind: Option<String>,
    /// Filter events after this timestamp (ISO 8601)
    pub from: Option<DateTime<Utc>>,
    /// Filter events before this timestamp (ISO 8601)
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of events to return (default 100, max 1000)
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct NotificationQueryResponse {
    /// Newest first
    pub notifications: Vec<NotificationRecord>,
    /// Total number of matching notifications
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Query the notification log
pub async fn query_notifications(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NotificationQueryParams>,
) -> Result<Json<NotificationQueryResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut base_filter = NotificationFilter::new();
    if let Some(ref id) = params.orchestration_id {
        base_filter = base_filter.with_orchestration_id(id);
    }
    if let Some(ref kind) = params.kind {
        base_filter = base_filter.with_kind(kind);
    }
    if params.from.is_some() || params.to.is_some() {
        base_filter = base_filter.with_time_range(params.from, params.to);
    }

    let query_filter = base_filter.clone().with_limit(limit).with_offset(offset);

    let store = state.notification_store();
    let notifications = store.query(&query_filter).map_err(|e| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to query notifications: {}", e),
        )
    })?;
    let total = store.count(&base_filter).map_err(|e| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to count notifications: {}", e),
        )
    })?;

    Ok(Json(NotificationQueryResponse {
        notifications,
        total,
        limit,
        offset,
    }))
}
