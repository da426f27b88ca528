//! Orchestration API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use sluice_core::orchestrator::{OrchestrationSnapshot, RecoveryReport};
use sluice_core::state::{ItemFilter, ItemState, StateStore};
use sluice_core::{OrchestrationKey, OrchestrationState, SourceDescriptor, StartOutcome};

use super::handlers::{error_response, orchestrator_error, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for item listings
const MAX_LIMIT: i64 = 1000;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub key: OrchestrationKey,
    pub outcome: StartOutcome,
}

/// Persisted state plus the live flags of its controller
#[derive(Debug, Serialize)]
pub struct OrchestrationResponse {
    #[serde(flatten)]
    pub state: OrchestrationState,
    /// In-memory running flag; the persisted `running` may be stale.
    pub is_running: bool,
    /// Whether a controller is activated for this key
    pub active: bool,
}

impl From<OrchestrationSnapshot> for OrchestrationResponse {
    fn from(snapshot: OrchestrationSnapshot) -> Self {
        Self {
            state: snapshot.state,
            is_running: snapshot.running,
            active: snapshot.active,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrchestrationListResponse {
    pub orchestrations: Vec<OrchestrationResponse>,
}

#[derive(Debug, Deserialize)]
pub struct ItemQueryParams {
    /// Phase name, e.g. "failed"
    pub phase: Option<String>,
    pub run_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ItemListResponse {
    pub items: Vec<ItemState>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

fn parse_key(raw: &str) -> Result<OrchestrationKey, ApiError> {
    raw.parse()
        .map_err(|e: sluice_core::key::KeyError| error_response(StatusCode::BAD_REQUEST, e.to_string()))
}

/// 404 unless something is known about `key`.
async fn require_known(state: &AppState, key: &OrchestrationKey) -> Result<(), ApiError> {
    match state.registry().snapshot(key).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Orchestration not found: {}", key),
        )),
        Err(e) => Err(orchestrator_error(e)),
    }
}

/// List persisted orchestrations, newest first
pub async fn list_orchestrations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OrchestrationListResponse>, ApiError> {
    let registry = state.registry();
    let persisted = registry.list().map_err(orchestrator_error)?;

    let mut orchestrations = Vec::with_capacity(persisted.len());
    for persisted_state in persisted {
        let response = match registry.get_active(&persisted_state.id).await {
            Some(controller) => OrchestrationResponse {
                state: controller.state().await,
                is_running: controller.is_running().await,
                active: true,
            },
            None => OrchestrationResponse {
                state: persisted_state,
                is_running: false,
                active: false,
            },
        };
        orchestrations.push(response);
    }

    Ok(Json(OrchestrationListResponse { orchestrations }))
}

/// Start a run for a source descriptor
pub async fn start_orchestration(
    State(state): State<Arc<AppState>>,
    Json(descriptor): Json<SourceDescriptor>,
) -> Result<impl IntoResponse, ApiError> {
    let (key, outcome) = state
        .registry()
        .start(descriptor)
        .await
        .map_err(orchestrator_error)?;

    Ok((StatusCode::ACCEPTED, Json(StartResponse { key, outcome })))
}

/// Get one orchestration
pub async fn get_orchestration(
    State(state): State<Arc<AppState>>,
    Path(raw_key): Path<String>,
) -> Result<Json<OrchestrationResponse>, ApiError> {
    let key = parse_key(&raw_key)?;
    match state.registry().snapshot(&key).await {
        Ok(Some(snapshot)) => Ok(Json(snapshot.into())),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Orchestration not found: {}", key),
        )),
        Err(e) => Err(orchestrator_error(e)),
    }
}

/// List persisted item states
pub async fn list_items(
    State(state): State<Arc<AppState>>,
    Path(raw_key): Path<String>,
    Query(params): Query<ItemQueryParams>,
) -> Result<Json<ItemListResponse>, ApiError> {
    let key = parse_key(&raw_key)?;
    require_known(&state, &key).await?;

    let mut filter = ItemFilter::new();
    if let Some(phase) = params.phase {
        filter = filter.with_phase(phase);
    }
    if let Some(run_id) = params.run_id {
        filter = filter.with_run_id(run_id);
    }
    let limit = params.limit.unwrap_or(filter.limit).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);
    let filter = filter.with_limit(limit).with_offset(offset);

    let items = state
        .registry()
        .deps()
        .store
        .list_items(&key, &filter)
        .map_err(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to list items: {}", e),
            )
        })?;

    Ok(Json(ItemListResponse {
        items,
        limit,
        offset,
    }))
}

/// Run a stuck-item sweep now
pub async fn recover_stuck_items(
    State(state): State<Arc<AppState>>,
    Path(raw_key): Path<String>,
) -> Result<Json<RecoveryReport>, ApiError> {
    let key = parse_key(&raw_key)?;
    require_known(&state, &key).await?;

    match state.registry().get_active(&key).await {
        Some(controller) => Ok(Json(controller.check_and_recover_stuck_items().await)),
        None => Ok(Json(RecoveryReport::default())),
    }
}

/// Clear the running flag and drop the current run
pub async fn force_reset(
    State(state): State<Arc<AppState>>,
    Path(raw_key): Path<String>,
) -> Result<Json<OrchestrationResponse>, ApiError> {
    let key = parse_key(&raw_key)?;
    require_known(&state, &key).await?;

    let controller = state
        .registry()
        .get_or_activate(&key)
        .await
        .map_err(orchestrator_error)?;
    controller.force_reset().await.map_err(orchestrator_error)?;

    Ok(Json(OrchestrationResponse {
        state: controller.state().await,
        is_running: false,
        active: true,
    }))
}

/// Refuse further runs for this key
pub async fn deactivate(
    State(state): State<Arc<AppState>>,
    Path(raw_key): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let key = parse_key(&raw_key)?;
    require_known(&state, &key).await?;

    if let Some(controller) = state.registry().get_active(&key).await {
        controller.deactivate();
    }
    Ok(Json(MessageResponse {
        message: format!("Orchestration {} deactivated", key),
    }))
}
