//! Per-category lease table and FIFO wait queue.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::{CoordinatorError, CoordinatorStatus, Lease};
use crate::metrics;

struct ActiveLease {
    lease: Lease,
    expires_at: Instant,
}

struct Waiter {
    id: u64,
    request_id: String,
    weight: u32,
    ttl: Duration,
    enqueued_at: Instant,
    tx: oneshot::Sender<Lease>,
}

#[derive(Default)]
struct LeaseTable {
    active: HashMap<Uuid, ActiveLease>,
    by_request: HashMap<String, Uuid>,
    active_weight: u32,
    queue: VecDeque<Waiter>,
    next_waiter_id: u64,
}

/// Grants weighted leases for one category.
pub struct ConcurrencyCoordinator {
    category: String,
    capacity: u32,
    table: Mutex<LeaseTable>,
}

impl ConcurrencyCoordinator {
    /// A capacity of 0 is clamped to 1.
    pub fn new(category: impl Into<String>, capacity: u32) -> Self {
        let category = category.into();
        let capacity = if capacity == 0 {
            error!(
                "Coordinator '{}' configured with capacity 0, clamping to 1",
                category
            );
            1
        } else {
            capacity
        };

        Self {
            category,
            capacity,
            table: Mutex::new(LeaseTable::default()),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Acquire a lease of `weight` for `request_id`.
    ///
    /// An active lease for the same `request_id` is returned as-is. With a
    /// zero `wait_timeout` the call never queues.
    pub async fn acquire(
        &self,
        request_id: &str,
        weight: u32,
        wait_timeout: Duration,
        lease_ttl: Duration,
    ) -> Result<Lease, CoordinatorError> {
        let weight = weight.max(1);
        if weight > self.capacity {
            return Err(CoordinatorError::WeightExceedsCapacity {
                category: self.category.clone(),
                weight,
                capacity: self.capacity,
            });
        }

        let (waiter_id, mut rx) = {
            let mut table = self.table.lock().await;
            self.expire_locked(&mut table);

            if let Some(lease) = Self::existing_lease(&table, request_id) {
                debug!(
                    "Request '{}' already holds lease {} in '{}'",
                    request_id, lease.lease_id, self.category
                );
                return Ok(lease);
            }

            if table.queue.is_empty() && table.active_weight + weight <= self.capacity {
                return Ok(self.grant_locked(&mut table, request_id, weight, lease_ttl));
            }

            if wait_timeout.is_zero() {
                metrics::LEASE_BACKPRESSURE
                    .with_label_values(&[&self.category, "no_wait"])
                    .inc();
                return Err(self.backpressure(request_id));
            }

            let (tx, rx) = oneshot::channel();
            let id = table.next_waiter_id;
            table.next_waiter_id += 1;
            table.queue.push_back(Waiter {
                id,
                request_id: request_id.to_string(),
                weight,
                ttl: lease_ttl,
                enqueued_at: Instant::now(),
                tx,
            });
            debug!(
                "Request '{}' queued in '{}' (queue length {})",
                request_id,
                self.category,
                table.queue.len()
            );
            (id, rx)
        };

        match tokio::time::timeout(wait_timeout, &mut rx).await {
            Ok(Ok(lease)) => Ok(lease),
            Ok(Err(_)) => Err(self.backpressure(request_id)),
            Err(_) => {
                {
                    let mut table = self.table.lock().await;
                    table.queue.retain(|w| w.id != waiter_id);
                }
                // A drain that ran before we took the lock has already sent.
                if let Ok(lease) = rx.try_recv() {
                    return Ok(lease);
                }
                metrics::LEASE_BACKPRESSURE
                    .with_label_values(&[&self.category, "timeout"])
                    .inc();
                warn!(
                    "Request '{}' timed out after {:?} waiting for '{}'",
                    request_id, wait_timeout, self.category
                );
                Err(self.backpressure(request_id))
            }
        }
    }

    /// Release a lease. Returns false for unknown or already-released leases.
    pub async fn release(&self, lease_id: Uuid) -> bool {
        let mut table = self.table.lock().await;
        let released = match table.active.remove(&lease_id) {
            Some(entry) => {
                Self::forget_locked(&mut table, &entry.lease);
                metrics::LEASES_RELEASED
                    .with_label_values(&[&self.category])
                    .inc();
                debug!(
                    "Released lease {} ('{}', weight {})",
                    lease_id, entry.lease.request_id, entry.lease.weight
                );
                true
            }
            None => false,
        };

        self.expire_locked(&mut table);
        self.drain_locked(&mut table);
        released
    }

    /// Withdraw `request_id` entirely: drop its queued waiters, then release
    /// its active lease. Covers a lease granted to a waiter whose caller was
    /// cancelled before it could take delivery. Returns true if a lease was
    /// released.
    pub async fn cancel(&self, request_id: &str) -> bool {
        let mut table = self.table.lock().await;
        let queued = table.queue.len();
        table.queue.retain(|w| w.request_id != request_id);
        let dequeued = queued - table.queue.len();

        let released = match table.by_request.get(request_id).copied() {
            Some(lease_id) => match table.active.remove(&lease_id) {
                Some(entry) => {
                    Self::forget_locked(&mut table, &entry.lease);
                    metrics::LEASES_RELEASED
                        .with_label_values(&[&self.category])
                        .inc();
                    true
                }
                None => false,
            },
            None => false,
        };
        if dequeued > 0 || released {
            debug!(
                "Cancelled '{}' in '{}' ({} waiters dropped, lease released: {})",
                request_id, self.category, dequeued, released
            );
        }

        self.expire_locked(&mut table);
        self.drain_locked(&mut table);
        released
    }

    /// Reclaim leases past their TTL. Returns how many were reclaimed.
    pub async fn expire_stale(&self) -> usize {
        let mut table = self.table.lock().await;
        self.expire_locked(&mut table)
    }

    pub async fn status(&self) -> CoordinatorStatus {
        let table = self.table.lock().await;
        CoordinatorStatus {
            category: self.category.clone(),
            capacity: self.capacity,
            active_weight: table.active_weight,
            active_leases: table.active.len(),
            queue_length: table.queue.len(),
        }
    }

    fn backpressure(&self, request_id: &str) -> CoordinatorError {
        CoordinatorError::Backpressure {
            category: self.category.clone(),
            request_id: request_id.to_string(),
        }
    }

    fn existing_lease(table: &LeaseTable, request_id: &str) -> Option<Lease> {
        table
            .by_request
            .get(request_id)
            .and_then(|id| table.active.get(id))
            .map(|entry| entry.lease.clone())
    }

    fn grant_locked(
        &self,
        table: &mut LeaseTable,
        request_id: &str,
        weight: u32,
        ttl: Duration,
    ) -> Lease {
        let lease = Lease {
            lease_id: Uuid::new_v4(),
            request_id: request_id.to_string(),
            category: self.category.clone(),
            weight,
            acquired_at: Utc::now(),
            ttl,
        };
        table.active_weight += weight;
        table.by_request.insert(request_id.to_string(), lease.lease_id);
        table.active.insert(
            lease.lease_id,
            ActiveLease {
                lease: lease.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        metrics::LEASES_GRANTED
            .with_label_values(&[&self.category])
            .inc();
        debug!(
            "Granted lease {} to '{}' in '{}' ({}/{})",
            lease.lease_id, request_id, self.category, table.active_weight, self.capacity
        );
        lease
    }

    fn forget_locked(table: &mut LeaseTable, lease: &Lease) {
        table.active_weight = table.active_weight.saturating_sub(lease.weight);
        if table.by_request.get(&lease.request_id) == Some(&lease.lease_id) {
            table.by_request.remove(&lease.request_id);
        }
    }

    fn expire_locked(&self, table: &mut LeaseTable) -> usize {
        let now = Instant::now();
        let expired: Vec<Uuid> = table
            .active
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for lease_id in &expired {
            if let Some(entry) = table.active.remove(lease_id) {
                Self::forget_locked(table, &entry.lease);
                metrics::LEASES_EXPIRED
                    .with_label_values(&[&self.category])
                    .inc();
                info!(
                    "Lease {} for '{}' in '{}' expired after {:?}",
                    lease_id, entry.lease.request_id, self.category, entry.lease.ttl
                );
            }
        }

        if !expired.is_empty() {
            self.drain_locked(table);
        }
        expired.len()
    }

    /// Grant queued waiters in arrival order while the head fits.
    fn drain_locked(&self, table: &mut LeaseTable) {
        while let Some(head) = table.queue.front() {
            if head.tx.is_closed() {
                table.queue.pop_front();
                continue;
            }

            if let Some(lease) = Self::existing_lease(table, &head.request_id) {
                if let Some(waiter) = table.queue.pop_front() {
                    let _ = waiter.tx.send(lease);
                }
                continue;
            }

            if table.active_weight + head.weight > self.capacity {
                break;
            }

            let Some(waiter) = table.queue.pop_front() else {
                break;
            };
            let lease = self.grant_locked(table, &waiter.request_id, waiter.weight, waiter.ttl);
            metrics::LEASE_WAIT_DURATION
                .with_label_values(&[&self.category])
                .observe(waiter.enqueued_at.elapsed().as_secs_f64());

            if let Err(lease) = waiter.tx.send(lease) {
                // caller went away between the check and the send
                if let Some(entry) = table.active.remove(&lease.lease_id) {
                    Self::forget_locked(table, &entry.lease);
                }
            }
        }
    }
}
