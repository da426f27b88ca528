//! Per-key orchestration controller.
//!
//! Owns the durable [`OrchestrationState`] for one key. Every counter
//! mutation happens under the controller's lock and is persisted before the
//! matching notifications are emitted. Emission also happens under the lock,
//! so subscribers observe events in settlement order.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::{ControllerDeps, OrchestratorError, RecoveryReport, StartOutcome};
use crate::collaborators::{CollaboratorError, WorkItem};
use crate::coordinator::{ConcurrencyCoordinator, Lease};
use crate::key::OrchestrationKey;
use crate::metrics;
use crate::notify::NotificationEvent;
use crate::state::{ItemPhase, ItemState, OrchestrationState, RunMode, SourceDescriptor};
use crate::worker::{
    lease_request_id, ItemFailure, ItemOutcome, ItemOwner, ItemWorker, LeaseSlot, WorkerContext,
};

struct TrackedItem {
    item: WorkItem,
    attempt: u32,
    settled: bool,
    task: Option<JoinHandle<()>>,
    lease: LeaseSlot,
}

struct ActiveRun {
    run_id: Uuid,
    descriptor: SourceDescriptor,
    collection: String,
    coordinator: Arc<ConcurrencyCoordinator>,
    halt_tx: watch::Sender<bool>,
    items: HashMap<String, TrackedItem>,
    enumeration: Option<JoinHandle<()>>,
    last_progress_at: u64,
}

impl ActiveRun {
    /// The tracked item an outcome refers to, if it is still current.
    fn accept(&mut self, outcome: &ItemOutcome) -> Option<&mut TrackedItem> {
        if outcome.run_id != self.run_id {
            return None;
        }
        self.items
            .get_mut(&outcome.item_id)
            .filter(|t| !t.settled && t.attempt == outcome.attempt)
    }

    /// Halt workers. With `abort`, also cancel their tasks and return the
    /// ids of unsettled items, whose leases or queued waiters still need
    /// withdrawing from the coordinator.
    fn stop(&mut self, abort: bool) -> Vec<String> {
        self.halt_tx.send_replace(true);
        if !abort {
            return Vec::new();
        }
        if let Some(handle) = self.enumeration.take() {
            handle.abort();
        }
        let mut pending = Vec::new();
        for (item_id, tracked) in self.items.iter_mut() {
            if let Some(task) = tracked.task.take() {
                task.abort();
            }
            tracked.lease.take();
            if !tracked.settled {
                pending.push(item_id.clone());
            }
        }
        pending
    }
}

struct ControllerInner {
    state: OrchestrationState,
    /// In-memory flag; a fresh activation always starts false.
    running: bool,
    run: Option<ActiveRun>,
}

/// Owns runs for one [`OrchestrationKey`].
pub struct OrchestrationController {
    key: OrchestrationKey,
    deps: Arc<ControllerDeps>,
    inner: Mutex<ControllerInner>,
    deactivated: AtomicBool,
    me: Weak<OrchestrationController>,
}

impl OrchestrationController {
    /// Build a controller from persisted state (or a blank record).
    pub fn activate(
        key: OrchestrationKey,
        deps: Arc<ControllerDeps>,
    ) -> Result<Arc<Self>, OrchestratorError> {
        let state = match deps.store.load_orchestration(&key)? {
            Some(state) => {
                if state.running {
                    info!(
                        "Orchestration {} was persisted as running; it stays idle until started",
                        key
                    );
                }
                state
            }
            None => OrchestrationState::new(key.clone()),
        };

        Ok(Arc::new_cyclic(|me| Self {
            key,
            deps,
            inner: Mutex::new(ControllerInner {
                state,
                running: false,
                run: None,
            }),
            deactivated: AtomicBool::new(false),
            me: me.clone(),
        }))
    }

    pub fn key(&self) -> &OrchestrationKey {
        &self.key
    }

    /// Start a run. A second call while running is a no-op.
    pub async fn start(
        &self,
        descriptor: SourceDescriptor,
    ) -> Result<StartOutcome, OrchestratorError> {
        descriptor
            .validate()
            .map_err(OrchestratorError::InvalidDescriptor)?;
        let actual = descriptor.key();
        if actual != self.key {
            return Err(OrchestratorError::KeyMismatch {
                expected: self.key.clone(),
                actual,
            });
        }
        let coordinator = self
            .deps
            .coordinators
            .get(&self.deps.config.lease_category)?;

        let mut inner = self.inner.lock().await;
        if self.is_deactivated() {
            return Err(OrchestratorError::Deactivated(self.key.clone()));
        }
        if inner.running {
            info!(
                "Orchestration {} already running (run {:?}), ignoring start",
                self.key, inner.state.run_id
            );
            return Ok(StartOutcome::AlreadyRunning);
        }

        let run_id = Uuid::new_v4();
        let now = Utc::now();
        let mut next = inner.state.clone();
        next.reason = descriptor.reason.clone();
        next.descriptor = Some(descriptor.clone());
        next.run_id = Some(run_id);
        next.total = None;
        next.processed = 0;
        next.failed = 0;
        next.skipped = 0;
        next.running = true;
        next.started_at = Some(now);
        next.completed_at = None;
        next.last_updated = now;
        next.sources.clear();
        next.errors.clear();
        self.deps.store.save_orchestration(&next)?;

        inner.state = next;
        inner.running = true;
        let (halt_tx, _) = watch::channel(false);
        inner.run = Some(ActiveRun {
            run_id,
            collection: descriptor.collection_name(),
            descriptor: descriptor.clone(),
            coordinator,
            halt_tx,
            items: HashMap::new(),
            enumeration: None,
            last_progress_at: 0,
        });

        metrics::RUNS_STARTED.inc();
        info!(
            "Orchestration {} started run {} ({:?} {}:{})",
            self.key, run_id, descriptor.mode, descriptor.category, descriptor.qualifier
        );
        self.deps
            .notify
            .emit(
                &self.key,
                NotificationEvent::RunStarted { run_id, descriptor },
            )
            .await;

        if let Some(me) = self.me.upgrade() {
            let handle = tokio::spawn(me.execute_run(run_id));
            if let Some(run) = inner.run.as_mut() {
                run.enumeration = Some(handle);
            }
        }

        Ok(StartOutcome::Started)
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running
    }

    pub async fn state(&self) -> OrchestrationState {
        self.inner.lock().await.state.clone()
    }

    /// Refuse new runs. In-flight items still settle.
    pub fn deactivate(&self) {
        if !self.deactivated.swap(true, Ordering::SeqCst) {
            info!("Orchestration {} deactivated", self.key);
        }
    }

    pub fn is_deactivated(&self) -> bool {
        self.deactivated.load(Ordering::SeqCst)
    }

    /// Deactivated and not running: safe to evict.
    pub async fn is_idle(&self) -> bool {
        self.is_deactivated() && !self.is_running().await
    }

    /// Settle a successful item.
    pub async fn on_item_completed(&self, outcome: ItemOutcome) {
        if let Some(ref lease) = outcome.lease {
            self.release_lease(lease).await;
        }

        let mut inner = self.inner.lock().await;
        let mut events = Vec::new();
        {
            let ControllerInner { state, run, .. } = &mut *inner;
            let Some(tracked) = run.as_mut().and_then(|r| r.accept(&outcome)) else {
                debug!(
                    "Ignoring completion of {} (run {}, attempt {}) for {}",
                    outcome.item_id, outcome.run_id, outcome.attempt, self.key
                );
                return;
            };
            tracked.settled = true;
            tracked.task = None;
            let source_id = tracked.item.source_id.clone();

            state.processed += 1;
            state.source_mut(&source_id).processed += 1;
            metrics::ITEMS_SETTLED.with_label_values(&["processed"]).inc();
        }

        self.after_settle_locked(&mut inner, &mut events);
        self.persist_locked(&mut inner.state);
        self.emit_all(events).await;
        drop(inner);
    }

    /// Settle or requeue a failed item.
    pub async fn on_item_failed(&self, outcome: ItemOutcome, failure: ItemFailure) {
        if let Some(ref lease) = outcome.lease {
            self.release_lease(lease).await;
        }

        let mut inner = self.inner.lock().await;
        let mut events = Vec::new();
        {
            let ControllerInner { state, run, .. } = &mut *inner;
            let Some(active) = run.as_mut() else {
                debug!("Ignoring failure of {} for idle {}", outcome.item_id, self.key);
                return;
            };
            let Some(tracked) = active.accept(&outcome) else {
                debug!(
                    "Ignoring failure of {} (run {}, attempt {}) for {}",
                    outcome.item_id, outcome.run_id, outcome.attempt, self.key
                );
                return;
            };

            if failure.transient && tracked.attempt < self.deps.config.max_item_retries {
                let item = tracked.item.clone();
                let attempt = tracked.attempt + 1;
                metrics::ITEMS_REQUEUED.with_label_values(&["transient"]).inc();
                info!(
                    "Requeueing {} for {} (attempt {}): {}",
                    item.item_id, self.key, attempt, failure.message
                );
                self.dispatch_locked(active, item, attempt, Some(failure.message));
                return;
            }

            tracked.settled = true;
            tracked.task = None;
            let item = tracked.item.clone();
            let attempt = tracked.attempt;
            self.settle_failed(state, active.run_id, &item, attempt, failure.message, &mut events);
        }

        self.check_failure_threshold_locked(&mut inner, &mut events);
        self.after_settle_locked(&mut inner, &mut events);
        self.persist_locked(&mut inner.state);
        self.emit_all(events).await;
        drop(inner);
    }

    /// Abandon items stuck in a lease-holding phase past the threshold.
    pub async fn check_and_recover_stuck_items(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let mut inner = self.inner.lock().await;
        if !inner.running {
            return report;
        }

        let threshold = self.deps.config.stuck_item_threshold_secs;
        let cutoff = Utc::now() - chrono::Duration::seconds(threshold as i64);
        let mut events = Vec::new();
        {
            let ControllerInner { state, run, .. } = &mut *inner;
            let Some(active) = run.as_mut() else {
                return report;
            };

            let mut stuck = Vec::new();
            for (item_id, tracked) in active.items.iter().filter(|(_, t)| !t.settled) {
                report.checked += 1;
                match self.deps.store.load_item(&self.key, item_id) {
                    Ok(Some(persisted))
                        if persisted.phase.holds_lease()
                            && persisted.attempts == tracked.attempt
                            && persisted.last_activity < cutoff =>
                    {
                        stuck.push(persisted);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Failed to load item {} of {}: {}", item_id, self.key, e),
                }
            }

            for mut persisted in stuck {
                let item_id = persisted.id.clone();
                let Some(tracked) = active.items.get_mut(&item_id) else {
                    continue;
                };
                if let Some(task) = tracked.task.take() {
                    task.abort();
                }
                // withdrawn before requeueing so the next attempt cannot reuse it
                tracked.lease.take();
                active
                    .coordinator
                    .cancel(&lease_request_id(&self.key, &item_id))
                    .await;

                let message = format!(
                    "stuck in {} since {}",
                    persisted.phase.name(),
                    persisted.last_activity.to_rfc3339()
                );
                warn!("Item {} of {} {}", item_id, self.key, message);

                if tracked.attempt < self.deps.config.max_item_retries {
                    let item = tracked.item.clone();
                    let attempt = tracked.attempt + 1;
                    metrics::ITEMS_REQUEUED.with_label_values(&["stuck"]).inc();
                    self.dispatch_locked(active, item, attempt, Some(message));
                    report.requeued.push(item_id);
                } else {
                    tracked.settled = true;
                    let item = tracked.item.clone();
                    let attempt = tracked.attempt;
                    persisted.phase = ItemPhase::Failed {
                        reason: message.clone(),
                    };
                    persisted.last_error = Some(message.clone());
                    persisted.last_activity = Utc::now();
                    if let Err(e) = self.deps.store.save_item(&persisted) {
                        warn!("Failed to persist failed item {}: {}", item_id, e);
                    }
                    self.settle_failed(state, active.run_id, &item, attempt, message, &mut events);
                    report.failed.push(item_id);
                }
            }
        }

        if !report.failed.is_empty() {
            self.check_failure_threshold_locked(&mut inner, &mut events);
            self.after_settle_locked(&mut inner, &mut events);
            self.persist_locked(&mut inner.state);
        }
        self.emit_all(events).await;
        drop(inner);

        if !report.is_empty() {
            info!(
                "Recovered {} stuck items for {} ({} requeued, {} failed)",
                report.requeued.len() + report.failed.len(),
                self.key,
                report.requeued.len(),
                report.failed.len()
            );
        }
        report
    }

    /// Clear the running flag and drop the current run, keeping its counters.
    pub async fn force_reset(&self) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().await;
        if let Some(mut run) = inner.run.take() {
            // An aborted task is only dropped on its next poll, so its queued
            // waiter is still live here. Withdraw it before crediting capacity.
            for item_id in run.stop(true) {
                run.coordinator
                    .cancel(&lease_request_id(&self.key, &item_id))
                    .await;
            }
        }

        inner.running = false;
        inner.state.running = false;
        inner.state.last_updated = Utc::now();
        self.deps.store.save_orchestration(&inner.state)?;

        let event = NotificationEvent::RunReset {
            run_id: inner.state.run_id,
            processed: inner.state.processed,
            failed: inner.state.failed,
        };
        warn!("Orchestration {} force reset", self.key);
        self.deps.notify.emit(&self.key, event).await;
        Ok(())
    }

    async fn execute_run(self: Arc<Self>, run_id: Uuid) {
        let descriptor = {
            let inner = self.inner.lock().await;
            match inner.run.as_ref() {
                Some(run) if run.run_id == run_id => run.descriptor.clone(),
                _ => return,
            }
        };

        if descriptor.mode == RunMode::Reindex {
            let collection = descriptor.collection_name();
            if let Err(e) = self.reset_collection(&collection).await {
                let reason = format!("failed to reset collection {}: {}", collection, e);
                return self.abort_run(run_id, reason).await;
            }
        }

        let started = Instant::now();
        let listed = self
            .deps
            .collaborators
            .enumerator
            .list(&descriptor)
            .await;
        metrics::COLLABORATOR_DURATION
            .with_label_values(&["enumerate"])
            .observe(started.elapsed().as_secs_f64());

        match listed {
            Ok(items) => {
                metrics::COLLABORATOR_CALLS
                    .with_label_values(&["enumerate", "ok"])
                    .inc();
                self.fan_out(run_id, items).await
            }
            Err(e) => {
                let label = if e.is_transient() { "transient" } else { "permanent" };
                metrics::COLLABORATOR_CALLS
                    .with_label_values(&["enumerate", label])
                    .inc();
                self.abort_run(run_id, format!("enumeration failed: {}", e))
                    .await
            }
        }
    }

    async fn reset_collection(&self, collection: &str) -> Result<(), CollaboratorError> {
        let index = &self.deps.collaborators.index;
        let limit = self.deps.config.index_timeout();
        let reset = async {
            index
                .ensure_collection(collection, self.deps.index_dimensions)
                .await?;
            index.clear_collection(collection).await
        };
        match tokio::time::timeout(limit, reset).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Transient(format!(
                "collection reset timed out after {:?}",
                limit
            ))),
        }
    }

    async fn fan_out(&self, run_id: Uuid, mut items: Vec<WorkItem>) {
        let mut inner = self.inner.lock().await;
        let mut events = Vec::new();
        {
            let ControllerInner { state, run, .. } = &mut *inner;
            let Some(active) = run.as_mut().filter(|r| r.run_id == run_id) else {
                return;
            };

            let mut seen = HashSet::new();
            items.retain(|item| seen.insert(item.item_id.clone()));

            state.total = Some(items.len() as u64);
            for item in &items {
                state.source_mut(&item.source_id).total += 1;
            }
            info!(
                "Orchestration {} run {} enumerated {} items",
                self.key,
                run_id,
                items.len()
            );

            let incremental = active.descriptor.mode == RunMode::Ingest;
            for item in items {
                if incremental && self.unchanged(&item) {
                    state.processed += 1;
                    state.skipped += 1;
                    state.source_mut(&item.source_id).processed += 1;
                    metrics::ITEMS_SETTLED.with_label_values(&["skipped"]).inc();
                    continue;
                }
                self.dispatch_locked(active, item, 1, None);
            }
        }

        self.after_settle_locked(&mut inner, &mut events);
        self.persist_locked(&mut inner.state);
        self.emit_all(events).await;
        drop(inner);
    }

    async fn abort_run(&self, run_id: Uuid, reason: String) {
        let mut inner = self.inner.lock().await;
        if !inner.run.as_ref().is_some_and(|r| r.run_id == run_id) {
            return;
        }
        error!("Orchestration {} run {} aborted: {}", self.key, run_id, reason);

        let mut events = Vec::new();
        self.end_run_locked(&mut inner, reason, "aborted", &mut events);
        self.persist_locked(&mut inner.state);
        self.emit_all(events).await;
        drop(inner);
    }

    /// Same content already indexed by an earlier run.
    fn unchanged(&self, item: &WorkItem) -> bool {
        if item.content_hash.is_empty() {
            return false;
        }
        match self.deps.store.load_item(&self.key, &item.item_id) {
            Ok(Some(previous)) => {
                previous.phase == ItemPhase::Complete
                    && previous.content_hash == item.content_hash
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to load item {} of {}: {}", item.item_id, self.key, e);
                false
            }
        }
    }

    /// Persist a queued record for `attempt` and spawn its worker.
    fn dispatch_locked(
        &self,
        run: &mut ActiveRun,
        item: WorkItem,
        attempt: u32,
        last_error: Option<String>,
    ) {
        let Some(owner) = self.me.upgrade() else {
            return;
        };

        let initial = ItemState {
            id: item.item_id.clone(),
            orchestration_id: self.key.clone(),
            run_id: run.run_id,
            item_ref: item.item_ref.clone(),
            source_id: item.source_id.clone(),
            content_hash: item.content_hash.clone(),
            phase: ItemPhase::Queued,
            attempts: attempt,
            last_error,
            last_activity: Utc::now(),
        };
        if let Err(e) = self.deps.store.save_item(&initial) {
            warn!("Failed to persist queued item {}: {}", item.item_id, e);
        }

        let collaborators = &self.deps.collaborators;
        let ctx = WorkerContext {
            config: self.deps.config.clone(),
            store: self.deps.store.clone(),
            coordinator: run.coordinator.clone(),
            copier: collaborators.copier.clone(),
            processor: collaborators.processor.clone(),
            index: collaborators.index.clone(),
            owner,
            collection: run.collection.clone(),
            halt: run.halt_tx.subscribe(),
        };
        let worker = Arc::new(ItemWorker::new(ctx, item.clone(), initial));
        let lease = worker.lease_slot();
        let task = tokio::spawn(worker.run());

        run.items.insert(
            item.item_id.clone(),
            TrackedItem {
                item,
                attempt,
                settled: false,
                task: Some(task),
                lease,
            },
        );
    }

    fn settle_failed(
        &self,
        state: &mut OrchestrationState,
        run_id: Uuid,
        item: &WorkItem,
        attempts: u32,
        message: String,
        events: &mut Vec<NotificationEvent>,
    ) {
        state.failed += 1;
        state.source_mut(&item.source_id).failed += 1;
        state.record_error(item.item_id.clone(), message.clone());
        metrics::ITEMS_SETTLED.with_label_values(&["failed"]).inc();
        warn!(
            "Item {} of {} failed after {} attempts: {}",
            item.item_id, self.key, attempts, message
        );

        events.push(NotificationEvent::ItemFailed {
            run_id,
            item_id: item.item_id.clone(),
            source_id: item.source_id.clone(),
            attempts,
            message,
        });
    }

    fn check_failure_threshold_locked(
        &self,
        inner: &mut ControllerInner,
        events: &mut Vec<NotificationEvent>,
    ) {
        let Some(max) = self.deps.config.max_failed_items else {
            return;
        };
        if inner.run.is_none() || inner.state.failed <= max || inner.state.is_finished() {
            return;
        }
        let reason = format!(
            "halted: {} items failed (max {})",
            inner.state.failed, max
        );
        warn!("Orchestration {} {}", self.key, reason);
        self.end_run_locked(inner, reason, "halted", events);
    }

    /// Progress and completion bookkeeping after any settlement.
    fn after_settle_locked(&self, inner: &mut ControllerInner, events: &mut Vec<NotificationEvent>) {
        let ControllerInner {
            state,
            running,
            run,
        } = inner;
        let Some(active) = run.as_mut() else {
            return;
        };

        let settled = state.settled();
        let finished = state.is_finished();
        let every = self.deps.config.progress_every.max(1);
        if settled > active.last_progress_at
            && (finished || settled >= active.last_progress_at + every)
        {
            active.last_progress_at = settled;
            events.push(NotificationEvent::RunProgress {
                run_id: active.run_id,
                total: state.total,
                processed: state.processed,
                failed: state.failed,
                skipped: state.skipped,
            });
        }

        if !finished {
            return;
        }

        let success = state.failed == 0;
        *running = false;
        state.running = false;
        state.completed_at = Some(Utc::now());
        events.push(NotificationEvent::RunCompleted {
            run_id: active.run_id,
            total: state.total.unwrap_or(0),
            processed: state.processed,
            failed: state.failed,
            success,
            aborted_reason: None,
        });
        metrics::RUNS_COMPLETED
            .with_label_values(&[if success { "success" } else { "failed" }])
            .inc();
        info!(
            "Orchestration {} run {} completed: {} processed ({} skipped), {} failed",
            self.key, active.run_id, state.processed, state.skipped, state.failed
        );
        *run = None;
    }

    /// Finish the current run early. Workers stop at their next phase boundary.
    fn end_run_locked(
        &self,
        inner: &mut ControllerInner,
        reason: String,
        label: &str,
        events: &mut Vec<NotificationEvent>,
    ) {
        let Some(mut active) = inner.run.take() else {
            return;
        };
        active.stop(false);

        inner.running = false;
        let state = &mut inner.state;
        state.running = false;
        state.completed_at = Some(Utc::now());
        state.record_error("", reason.clone());

        events.push(NotificationEvent::RunCompleted {
            run_id: active.run_id,
            total: state.total.unwrap_or(0),
            processed: state.processed,
            failed: state.failed,
            success: false,
            aborted_reason: Some(reason),
        });
        metrics::RUNS_COMPLETED.with_label_values(&[label]).inc();
    }

    fn persist_locked(&self, state: &mut OrchestrationState) {
        state.last_updated = Utc::now();
        if let Err(e) = self.deps.store.save_orchestration(state) {
            error!("Failed to persist orchestration {}: {}", self.key, e);
        }
    }

    async fn release_lease(&self, lease: &Lease) {
        match self.deps.coordinators.get(&lease.category) {
            Ok(coordinator) => {
                if !coordinator.release(lease.lease_id).await {
                    debug!("Lease {} was already released", lease.lease_id);
                }
            }
            Err(e) => warn!("Cannot release lease {}: {}", lease.lease_id, e),
        }
    }

    async fn emit_all(&self, events: Vec<NotificationEvent>) {
        for event in events {
            self.deps.notify.emit(&self.key, event).await;
        }
    }
}

#[async_trait]
impl ItemOwner for OrchestrationController {
    async fn on_item_completed(&self, outcome: ItemOutcome) {
        OrchestrationController::on_item_completed(self, outcome).await
    }

    async fn on_item_failed(&self, outcome: ItemOutcome, failure: ItemFailure) {
        OrchestrationController::on_item_failed(self, outcome, failure).await
    }
}
