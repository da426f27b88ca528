//! Testing utilities and mock implementations.
//!
//! Mock collaborators let the orchestration engine run end to end without a
//! filesystem or a processing backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice_core::testing::fixtures::{self, TestHarness};
//!
//! let harness = TestHarness::new();
//! harness
//!     .enumerator
//!     .set_items("blobs", "batch", fixtures::work_items("docs", 3))
//!     .await;
//!
//! let registry = harness.registry();
//! registry.start(SourceDescriptor::new("blobs", "batch")).await?;
//! assert!(harness.wait_for("run_completed", 1).await);
//! ```

mod mock_content_processor;
mod mock_index_writer;
mod mock_item_copier;
mod mock_source_enumerator;
mod recording_sink;
mod scripted;

pub use mock_content_processor::MockContentProcessor;
pub use mock_index_writer::MockIndexWriter;
pub use mock_item_copier::MockItemCopier;
pub use mock_source_enumerator::MockSourceEnumerator;
pub use recording_sink::RecordingSink;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use super::{
        MockContentProcessor, MockIndexWriter, MockItemCopier, MockSourceEnumerator,
        RecordingSink,
    };
    use crate::collaborators::WorkItem;
    use crate::coordinator::CoordinatorRegistry;
    use crate::key::OrchestrationKey;
    use crate::notify::{
        create_notification_system, NotificationSink, NotifyHandle, SqliteNotificationStore,
    };
    use crate::orchestrator::{
        Collaborators, ControllerDeps, ControllerRegistry, OrchestrationController,
        OrchestratorConfig,
    };
    use crate::state::SqliteStateStore;

    /// Orchestrator config with short timeouts for tests.
    pub fn fast_orchestrator_config() -> OrchestratorConfig {
        OrchestratorConfig {
            lease_wait_timeout_secs: 5,
            lease_ttl_secs: 60,
            lease_retry_backoff_ms: 10,
            progress_every: 1,
            copy_timeout_secs: 5,
            process_timeout_secs: 5,
            index_timeout_secs: 5,
            ..OrchestratorConfig::default()
        }
    }

    /// A work item with a content hash derived from its id.
    pub fn work_item(item_id: &str, source_id: &str) -> WorkItem {
        WorkItem {
            item_id: item_id.to_string(),
            item_ref: format!("/sources/{}", item_id),
            content_hash: format!("hash-{}", item_id),
            source_id: source_id.to_string(),
        }
    }

    /// `count` items named `item-<n>.txt` under one source.
    pub fn work_items(source_id: &str, count: usize) -> Vec<WorkItem> {
        (1..=count)
            .map(|i| work_item(&format!("item-{}.txt", i), source_id))
            .collect()
    }

    /// In-memory engine wired to mock collaborators.
    ///
    /// Must be created inside a Tokio runtime; the notification dispatcher
    /// is spawned on construction.
    pub struct TestHarness {
        pub config: OrchestratorConfig,
        pub store: Arc<SqliteStateStore>,
        pub notifications: Arc<SqliteNotificationStore>,
        pub coordinators: Arc<CoordinatorRegistry>,
        pub enumerator: Arc<MockSourceEnumerator>,
        pub copier: Arc<MockItemCopier>,
        pub processor: Arc<MockContentProcessor>,
        pub index: Arc<MockIndexWriter>,
        pub sink: Arc<RecordingSink>,
        pub notify: NotifyHandle,
    }

    impl TestHarness {
        /// Capacity 4 in the `ingestion` category.
        pub fn new() -> Self {
            Self::with_capacity(4)
        }

        pub fn with_capacity(capacity: u32) -> Self {
            Self::build(fast_orchestrator_config(), capacity, SqliteStateStore::in_memory())
        }

        pub fn with_config(config: OrchestratorConfig, capacity: u32) -> Self {
            Self::build(config, capacity, SqliteStateStore::in_memory())
        }

        /// Share an existing state store, e.g. to simulate a restart.
        pub fn with_store(store: Arc<SqliteStateStore>, capacity: u32) -> Self {
            let mut harness = Self::with_capacity(capacity);
            harness.store = store;
            harness
        }

        fn build(
            config: OrchestratorConfig,
            capacity: u32,
            store: Result<SqliteStateStore, crate::state::StoreError>,
        ) -> Self {
            let store = Arc::new(store.expect("in-memory state store"));
            let notifications =
                Arc::new(SqliteNotificationStore::in_memory().expect("in-memory notification store"));
            let sink = Arc::new(RecordingSink::new());
            let sinks: Vec<Arc<dyn NotificationSink>> = vec![sink.clone()];
            let (notify, dispatcher) =
                create_notification_system(notifications.clone(), sinks, 1000);
            tokio::spawn(dispatcher.run());

            let categories = BTreeMap::from([(config.lease_category.clone(), capacity)]);
            Self {
                config,
                store,
                notifications,
                coordinators: Arc::new(CoordinatorRegistry::new(&categories)),
                enumerator: Arc::new(MockSourceEnumerator::new()),
                copier: Arc::new(MockItemCopier::new()),
                processor: Arc::new(MockContentProcessor::new()),
                index: Arc::new(MockIndexWriter::new()),
                sink,
                notify,
            }
        }

        pub fn deps(&self) -> ControllerDeps {
            ControllerDeps {
                config: self.config.clone(),
                index_dimensions: 8,
                store: self.store.clone(),
                coordinators: self.coordinators.clone(),
                collaborators: Collaborators {
                    enumerator: self.enumerator.clone(),
                    copier: self.copier.clone(),
                    processor: self.processor.clone(),
                    index: self.index.clone(),
                },
                notify: self.notify.clone(),
            }
        }

        pub fn registry(&self) -> Arc<ControllerRegistry> {
            Arc::new(ControllerRegistry::new(self.deps()))
        }

        /// Activate a standalone controller, outside any registry.
        pub fn controller(&self, key: &OrchestrationKey) -> Arc<OrchestrationController> {
            OrchestrationController::activate(key.clone(), Arc::new(self.deps()))
                .expect("activate controller")
        }

        /// Wait up to five seconds for `count` notifications of `kind`.
        pub async fn wait_for(&self, kind: &str, count: usize) -> bool {
            self.sink.wait_for(kind, count, Duration::from_secs(5)).await
        }
    }

    impl Default for TestHarness {
        fn default() -> Self {
            Self::new()
        }
    }
}
