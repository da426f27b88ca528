use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use sluice_core::coordinator::CoordinatorStatus;

use super::handlers::{error_response, ApiError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CoordinatorListResponse {
    /// Ordered by category
    pub coordinators: Vec<CoordinatorStatus>,
}

pub async fn list_coordinators(State(state): State<Arc<AppState>>) -> Json<CoordinatorListResponse> {
    Json(CoordinatorListResponse {
        coordinators: state.coordinators().statuses().await,
    })
}

pub async fn get_coordinator(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
) -> Result<Json<CoordinatorStatus>, ApiError> {
    let coordinator = state
        .coordinators()
        .get(&category)
        .map_err(|e| error_response(StatusCode::NOT_FOUND, e.to_string()))?;
    Ok(Json(coordinator.status().await))
}
