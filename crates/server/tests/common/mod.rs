//! Common test utilities for API testing with mocks.
//!
//! Builds the router in-process on top of the core test harness, so
//! collaborators are fully controllable and no port is bound.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use sluice_core::notify::NotificationStore;
use sluice_core::{Config, ControllerRegistry, OrchestratorConfig};

/// Re-export fixtures for test convenience
pub use sluice_core::testing::fixtures;
use sluice_core::testing::fixtures::TestHarness;

/// Test fixture for API testing with mock collaborators.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_start() {
///     let fixture = TestFixture::new();
///
///     let response = fixture.post("/api/v1/orchestrations", json!({
///         "category": "blobs",
///         "qualifier": "batch"
///     })).await;
///
///     assert_eq!(response.status, 202);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Core harness: mocks, stores, coordinators
    pub harness: TestHarness,
    pub registry: Arc<ControllerRegistry>,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    /// Create a fixture with capacity 4 in the `ingestion` category.
    pub fn new() -> Self {
        Self::with_harness(TestHarness::new())
    }

    pub fn with_orchestrator_config(config: OrchestratorConfig, capacity: u32) -> Self {
        Self::with_harness(TestHarness::with_config(config, capacity))
    }

    fn with_harness(harness: TestHarness) -> Self {
        let mut config = Config::default();
        config.orchestrator = harness.config.clone();
        let category = harness.config.lease_category.clone();
        let capacity = harness
            .coordinators
            .get(&category)
            .map(|c| c.capacity())
            .unwrap_or(1);
        config.coordinator.categories = [(category, capacity)].into_iter().collect();

        let registry = harness.registry();
        let notification_store: Arc<dyn NotificationStore> = harness.notifications.clone();
        let state = Arc::new(sluice_server::state::AppState::new(
            config,
            Arc::clone(&registry),
            Arc::clone(&harness.coordinators),
            notification_store,
        ));
        let router = sluice_server::api::create_router(state);

        Self {
            router,
            harness,
            registry,
        }
    }

    /// Wait up to five seconds for `count` notifications of `kind`.
    pub async fn wait_for(&self, kind: &str, count: usize) -> bool {
        self.harness
            .sink
            .wait_for(kind, count, Duration::from_secs(5))
            .await
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).to_string();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}
