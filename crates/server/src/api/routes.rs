use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::middleware::metrics_middleware;
use super::{coordinators, handlers, notifications, orchestrations};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Orchestrations
        .route(
            "/orchestrations",
            get(orchestrations::list_orchestrations).post(orchestrations::start_orchestration),
        )
        .route("/orchestrations/{key}", get(orchestrations::get_orchestration))
        .route(
            "/orchestrations/{key}/items",
            get(orchestrations::list_items),
        )
        .route(
            "/orchestrations/{key}/recover",
            post(orchestrations::recover_stuck_items),
        )
        .route(
            "/orchestrations/{key}/reset",
            post(orchestrations::force_reset),
        )
        .route(
            "/orchestrations/{key}/deactivate",
            post(orchestrations::deactivate),
        )
        // Coordinators
        .route("/coordinators", get(coordinators::list_coordinators))
        .route("/coordinators/{category}", get(coordinators::get_coordinator))
        // Notifications
        .route("/notifications", get(notifications::query_notifications));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
