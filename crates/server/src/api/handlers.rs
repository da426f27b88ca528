use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use sluice_core::{CoordinatorError, OrchestratorError, SanitizedConfig};

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Error body shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn error_response(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// Map an orchestration error onto an HTTP status.
pub fn orchestrator_error(e: OrchestratorError) -> ApiError {
    let status = match &e {
        OrchestratorError::InvalidDescriptor(_) | OrchestratorError::KeyMismatch { .. } => {
            StatusCode::BAD_REQUEST
        }
        OrchestratorError::Deactivated(_) => StatusCode::CONFLICT,
        OrchestratorError::Coordinator(CoordinatorError::UnknownCategory(_)) => {
            StatusCode::NOT_FOUND
        }
        OrchestratorError::Store(_) | OrchestratorError::Coordinator(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        tracing::error!("Request failed: {}", e);
    }
    error_response(status, e.to_string())
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state).await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
