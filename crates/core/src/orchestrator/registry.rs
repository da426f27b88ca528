//! Activation and housekeeping for orchestration controllers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::controller::OrchestrationController;
use super::types::{ControllerDeps, OrchestratorError, RecoveryReport, StartOutcome};
use crate::key::OrchestrationKey;
use crate::state::{OrchestrationState, SourceDescriptor};

/// Point-in-time view of one orchestration.
#[derive(Debug, Clone)]
pub struct OrchestrationSnapshot {
    pub state: OrchestrationState,
    /// In-memory running flag; false when no controller is active.
    pub running: bool,
    pub active: bool,
}

/// At most one live controller per key.
pub struct ControllerRegistry {
    deps: Arc<ControllerDeps>,
    controllers: Mutex<HashMap<OrchestrationKey, Arc<OrchestrationController>>>,
}

impl ControllerRegistry {
    pub fn new(deps: ControllerDeps) -> Self {
        Self {
            deps: Arc::new(deps),
            controllers: Mutex::new(HashMap::new()),
        }
    }

    pub fn deps(&self) -> &ControllerDeps {
        &self.deps
    }

    /// The live controller for `key`, activating one if needed.
    pub async fn get_or_activate(
        &self,
        key: &OrchestrationKey,
    ) -> Result<Arc<OrchestrationController>, OrchestratorError> {
        let mut controllers = self.controllers.lock().await;
        // a deactivated controller keeps its key until evicted
        if let Some(controller) = controllers.get(key) {
            return Ok(controller.clone());
        }

        let controller = OrchestrationController::activate(key.clone(), self.deps.clone())?;
        debug!("Activated controller for {}", key);
        controllers.insert(key.clone(), controller.clone());
        Ok(controller)
    }

    pub async fn get_active(&self, key: &OrchestrationKey) -> Option<Arc<OrchestrationController>> {
        self.controllers.lock().await.get(key).cloned()
    }

    /// Route a descriptor to its controller and start a run.
    pub async fn start(
        &self,
        descriptor: SourceDescriptor,
    ) -> Result<(OrchestrationKey, StartOutcome), OrchestratorError> {
        descriptor
            .validate()
            .map_err(OrchestratorError::InvalidDescriptor)?;
        let key = descriptor.key();
        let controller = self.get_or_activate(&key).await?;
        let outcome = controller.start(descriptor).await?;
        Ok((key, outcome))
    }

    /// Live state when a controller is active, persisted state otherwise.
    pub async fn snapshot(
        &self,
        key: &OrchestrationKey,
    ) -> Result<Option<OrchestrationSnapshot>, OrchestratorError> {
        if let Some(controller) = self.get_active(key).await {
            return Ok(Some(OrchestrationSnapshot {
                state: controller.state().await,
                running: controller.is_running().await,
                active: true,
            }));
        }
        Ok(self
            .deps
            .store
            .load_orchestration(key)?
            .map(|state| OrchestrationSnapshot {
                state,
                running: false,
                active: false,
            }))
    }

    /// Every persisted orchestration, newest first.
    pub fn list(&self) -> Result<Vec<OrchestrationState>, OrchestratorError> {
        Ok(self.deps.store.list_orchestrations()?)
    }

    /// Run stuck-item recovery on every running controller.
    pub async fn sweep_stuck(&self) -> Vec<(OrchestrationKey, RecoveryReport)> {
        let controllers: Vec<_> = self.controllers.lock().await.values().cloned().collect();
        let mut reports = Vec::new();
        for controller in controllers {
            let report = controller.check_and_recover_stuck_items().await;
            if !report.is_empty() {
                reports.push((controller.key().clone(), report));
            }
        }
        reports
    }

    /// Drop deactivated controllers that have no run in progress.
    pub async fn evict_idle(&self) -> usize {
        let mut controllers = self.controllers.lock().await;
        let mut idle = Vec::new();
        for (key, controller) in controllers.iter() {
            if controller.is_idle().await {
                idle.push(key.clone());
            }
        }
        for key in &idle {
            controllers.remove(key);
            debug!("Evicted idle controller {}", key);
        }
        idle.len()
    }

    pub async fn active_count(&self) -> usize {
        self.controllers.lock().await.len()
    }

    pub async fn running_count(&self) -> usize {
        let controllers: Vec<_> = self.controllers.lock().await.values().cloned().collect();
        join_all(controllers.iter().map(|c| c.is_running()))
            .await
            .into_iter()
            .filter(|running| *running)
            .count()
    }
}

/// Periodically recover stuck items and evict deactivated idle controllers.
pub fn spawn_housekeeping(
    registry: Arc<ControllerRegistry>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Controller housekeeping started (interval: {:?})", interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Controller housekeeping shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    for (key, report) in registry.sweep_stuck().await {
                        warn!(
                            "Stuck sweep for {}: requeued {:?}, failed {:?}",
                            key, report.requeued, report.failed
                        );
                    }
                    let evicted = registry.evict_idle().await;
                    if evicted > 0 {
                        debug!("Evicted {} idle controllers", evicted);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[tokio::test]
    async fn test_get_or_activate_returns_same_controller() {
        let harness = fixtures::TestHarness::new();
        let registry = harness.registry();
        let key = OrchestrationKey::derive("blobs", "a");

        let first = registry.get_or_activate(&key).await.unwrap();
        let second = registry.get_or_activate(&key).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_unknown_key_is_none() {
        let harness = fixtures::TestHarness::new();
        let registry = harness.registry();
        let key = OrchestrationKey::derive("blobs", "missing");
        assert!(registry.snapshot(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_descriptor() {
        let harness = fixtures::TestHarness::new();
        let registry = harness.registry();
        let err = registry
            .start(SourceDescriptor::new("", "a"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidDescriptor(_)));
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_deactivated_idle_controllers_are_evicted() {
        let harness = fixtures::TestHarness::new();
        let registry = harness.registry();
        let key = OrchestrationKey::derive("blobs", "a");
        let controller = registry.get_or_activate(&key).await.unwrap();

        // active but never deactivated: kept
        assert_eq!(registry.evict_idle().await, 0);
        assert_eq!(registry.active_count().await, 1);

        controller.deactivate();
        assert_eq!(registry.evict_idle().await, 1);
        assert_eq!(registry.active_count().await, 0);

        // A later request activates a fresh controller.
        let again = registry.get_or_activate(&key).await.unwrap();
        assert!(!Arc::ptr_eq(&controller, &again));
        assert!(!again.is_deactivated());
    }

    #[tokio::test]
    async fn test_deactivated_controller_refuses_start_until_evicted() {
        let harness = fixtures::TestHarness::new();
        let registry = harness.registry();
        let descriptor = SourceDescriptor::new("blobs", "a");
        let controller = registry.get_or_activate(&descriptor.key()).await.unwrap();
        controller.deactivate();

        let err = registry.start(descriptor.clone()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Deactivated(_)));

        registry.evict_idle().await;
        let (_, outcome) = registry.start(descriptor).await.unwrap();
        assert_eq!(outcome, StartOutcome::Started);
    }

    #[tokio::test]
    async fn test_running_controllers_are_not_evicted() {
        let harness = fixtures::TestHarness::new();
        harness
            .enumerator
            .set_items("blobs", "a", fixtures::work_items("docs", 1))
            .await;
        harness.processor.hang_item("item-1.txt").await;
        let registry = harness.registry();

        registry.start(SourceDescriptor::new("blobs", "a")).await.unwrap();
        let key = SourceDescriptor::new("blobs", "a").key();
        registry.get_active(&key).await.unwrap().deactivate();
        assert_eq!(registry.evict_idle().await, 0);
        assert_eq!(registry.running_count().await, 1);

        registry.get_active(&key).await.unwrap().force_reset().await.unwrap();
        assert_eq!(registry.running_count().await, 0);
    }
}
