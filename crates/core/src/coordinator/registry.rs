//! Category → coordinator lookup plus the lease reaper loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{ConcurrencyCoordinator, CoordinatorError, CoordinatorStatus};

/// Holds one coordinator per configured category.
pub struct CoordinatorRegistry {
    coordinators: BTreeMap<String, Arc<ConcurrencyCoordinator>>,
}

impl CoordinatorRegistry {
    pub fn new(categories: &BTreeMap<String, u32>) -> Self {
        let coordinators = categories
            .iter()
            .map(|(category, capacity)| {
                (
                    category.clone(),
                    Arc::new(ConcurrencyCoordinator::new(category.clone(), *capacity)),
                )
            })
            .collect();
        Self { coordinators }
    }

    pub fn get(&self, category: &str) -> Result<Arc<ConcurrencyCoordinator>, CoordinatorError> {
        self.coordinators
            .get(category)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownCategory(category.to_string()))
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.coordinators.keys().map(String::as_str)
    }

    /// Status of every category, ordered by name.
    pub async fn statuses(&self) -> Vec<CoordinatorStatus> {
        join_all(self.coordinators.values().map(|c| c.status())).await
    }

    /// Run `expire_stale` on every coordinator.
    pub async fn expire_all(&self) -> usize {
        let mut total = 0;
        for coordinator in self.coordinators.values() {
            total += coordinator.expire_stale().await;
        }
        total
    }
}

/// Spawn the loop that reclaims expired leases every `interval`.
pub fn spawn_reapers(
    registry: Arc<CoordinatorRegistry>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Lease reaper started (every {:?})", interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Lease reaper received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    let expired = registry.expire_all().await;
                    if expired > 0 {
                        debug!("Lease reaper reclaimed {} leases", expired);
                    }
                }
            }
        }
        info!("Lease reaper stopped");
    })
}
