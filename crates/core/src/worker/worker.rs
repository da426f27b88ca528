//! Item worker implementation.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::types::{
    lease_request_id, ItemFailure, ItemOutcome, LeaseSlot, WorkerContext, WorkerError,
};
use crate::collaborators::{CollaboratorError, IndexRecord, WorkItem};
use crate::coordinator::CoordinatorError;
use crate::metrics;
use crate::state::{ItemPhase, ItemState};

/// Drives one attempt of one item through `queued → copying → processing →
/// indexing → complete`.
pub struct ItemWorker {
    ctx: WorkerContext,
    item: WorkItem,
    state: Mutex<ItemState>,
    lease: LeaseSlot,
}

impl ItemWorker {
    /// `initial` must be the persisted `queued` record for this attempt.
    pub fn new(ctx: WorkerContext, item: WorkItem, initial: ItemState) -> Self {
        Self {
            ctx,
            item,
            state: Mutex::new(initial),
            lease: LeaseSlot::new(),
        }
    }

    pub fn lease_slot(&self) -> LeaseSlot {
        self.lease.clone()
    }

    pub async fn state(&self) -> ItemState {
        self.state.lock().await.clone()
    }

    pub async fn is_active(&self) -> bool {
        !self.state.lock().await.phase.is_terminal()
    }

    /// Run the whole attempt. Reports to the owner at most once.
    pub async fn run(self: Arc<Self>) {
        match self.start().await {
            Ok(()) => {}
            Err(WorkerError::Halted) => return self.exit_halted().await,
            Err(e) => return self.fail(ItemFailure::from(&e)).await,
        }

        if self.halted() {
            return self.exit_halted().await;
        }
        let copied = self
            .timed("copy", self.ctx.config.copy_timeout(), self.ctx.copier.copy(&self.item))
            .await;
        match copied {
            Ok(()) => {
                if let Err(e) = self.on_copy_completed().await {
                    return self.fail(ItemFailure::from(&e)).await;
                }
            }
            Err(e) => return self.on_copy_failed(e).await,
        }

        if self.halted() {
            return self.exit_halted().await;
        }
        let processed = self
            .timed(
                "process",
                self.ctx.config.process_timeout(),
                self.ctx.processor.process(&self.item),
            )
            .await;
        match processed {
            Ok(records) => self.on_processing_completed(records).await,
            Err(e) => self.on_processing_failed(e).await,
        }
    }

    /// Acquire the item lease, then move to `copying`.
    pub async fn start(&self) -> Result<(), WorkerError> {
        {
            let state = self.state.lock().await;
            if state.phase != ItemPhase::Queued {
                return Err(WorkerError::IllegalTransition {
                    item_id: self.item.item_id.clone(),
                    from: state.phase.name(),
                    to: ItemPhase::Copying.name(),
                });
            }
        }

        if !self.lease.is_held() {
            let lease = self.acquire_lease().await?;
            self.lease.put(lease);
        }
        self.transition(ItemPhase::Copying).await
    }

    pub async fn on_copy_completed(&self) -> Result<(), WorkerError> {
        self.transition(ItemPhase::Processing).await
    }

    pub async fn on_copy_failed(&self, err: CollaboratorError) {
        debug!("Copy failed for {}: {}", self.item.item_id, err);
        self.fail(err.into()).await
    }

    /// Move to `indexing`, replace the item's records, then complete.
    pub async fn on_processing_completed(&self, records: Vec<IndexRecord>) {
        if let Err(e) = self.transition(ItemPhase::Indexing).await {
            return self.fail(ItemFailure::from(&e)).await;
        }
        if self.halted() {
            return self.exit_halted().await;
        }

        let collection = self.ctx.collection.as_str();
        let written = self
            .timed("index", self.ctx.config.index_timeout(), async {
                self.ctx
                    .index
                    .delete_file(collection, &self.item.item_id)
                    .await?;
                self.ctx.index.upsert(collection, &records).await
            })
            .await;

        match written {
            Ok(()) => {
                if let Err(e) = self.mark_complete().await {
                    self.fail(ItemFailure::from(&e)).await;
                }
            }
            Err(e) => self.fail(e.into()).await,
        }
    }

    pub async fn on_processing_failed(&self, err: CollaboratorError) {
        debug!("Processing failed for {}: {}", self.item.item_id, err);
        self.fail(err.into()).await
    }

    /// Terminal success. Returns false if the item was already terminal.
    pub async fn mark_complete(&self) -> Result<bool, WorkerError> {
        {
            let state = self.state.lock().await;
            if state.phase.is_terminal() {
                return Ok(false);
            }
        }
        self.transition(ItemPhase::Complete).await?;

        let outcome = self.outcome().await;
        debug!(
            "Item {} complete (attempt {})",
            outcome.item_id, outcome.attempt
        );
        self.ctx.owner.on_item_completed(outcome).await;
        Ok(true)
    }

    /// Terminal failure. Returns false if the item was already terminal.
    ///
    /// The owner is notified even if persisting the failure fails.
    pub async fn mark_failed(&self, failure: ItemFailure) -> Result<bool, WorkerError> {
        let persisted = {
            let mut state = self.state.lock().await;
            if state.phase.is_terminal() {
                return Ok(false);
            }
            let mut updated = state.clone();
            updated.phase = ItemPhase::Failed {
                reason: failure.message.clone(),
            };
            updated.last_error = Some(failure.message.clone());
            updated.last_activity = Utc::now();
            let persisted = self.ctx.store.save_item(&updated);
            *state = updated;
            persisted
        };
        if let Err(ref e) = persisted {
            warn!(
                "Failed to persist failure of item {}: {}",
                self.item.item_id, e
            );
        }

        let outcome = self.outcome().await;
        self.ctx.owner.on_item_failed(outcome, failure).await;
        persisted.map(|_| true).map_err(WorkerError::from)
    }

    async fn fail(&self, failure: ItemFailure) {
        if let Err(e) = self.mark_failed(failure).await {
            debug!("mark_failed for {}: {}", self.item.item_id, e);
        }
    }

    async fn outcome(&self) -> ItemOutcome {
        let state = self.state.lock().await;
        ItemOutcome {
            item_id: state.id.clone(),
            run_id: state.run_id,
            attempt: state.attempts,
            lease: self.lease.take(),
        }
    }

    fn halted(&self) -> bool {
        *self.ctx.halt.borrow() || self.ctx.halt.has_changed().is_err()
    }

    /// Stop without reporting: give the lease back directly.
    async fn exit_halted(&self) {
        if let Some(lease) = self.lease.take() {
            self.ctx.coordinator.release(lease.lease_id).await;
        }
        info!("Item {} stopped: run halted", self.item.item_id);
    }

    async fn transition(&self, next: ItemPhase) -> Result<(), WorkerError> {
        let mut state = self.state.lock().await;
        if !state.phase.can_transition_to(&next) {
            return Err(WorkerError::IllegalTransition {
                item_id: state.id.clone(),
                from: state.phase.name(),
                to: next.name(),
            });
        }

        let mut updated = state.clone();
        updated.phase = next;
        updated.last_activity = Utc::now();
        self.ctx.store.save_item(&updated)?;
        *state = updated;
        Ok(())
    }

    async fn acquire_lease(&self) -> Result<crate::coordinator::Lease, WorkerError> {
        let config = &self.ctx.config;
        let request_id = lease_request_id(
            &self.state.lock().await.orchestration_id,
            &self.item.item_id,
        );
        let attempts = config.lease_acquire_attempts.max(1);
        let mut backoff = config.lease_retry_backoff();

        for attempt in 1..=attempts {
            if self.halted() {
                return Err(WorkerError::Halted);
            }

            let mut halt = self.ctx.halt.clone();
            let acquired = tokio::select! {
                result = self.ctx.coordinator.acquire(
                    &request_id,
                    config.item_lease_weight,
                    config.lease_wait_timeout(),
                    config.lease_ttl(),
                ) => result,
                _ = async { let _ = halt.wait_for(|halted| *halted).await; } => {
                    // a grant racing the halt must not outlive the dropped waiter
                    self.ctx.coordinator.cancel(&request_id).await;
                    return Err(WorkerError::Halted);
                }
            };

            match acquired {
                Ok(lease) => return Ok(lease),
                Err(CoordinatorError::Backpressure { .. }) if attempt < attempts => {
                    debug!(
                        "Backpressure for {} (attempt {}/{}), retrying in {:?}",
                        request_id, attempt, attempts, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e @ CoordinatorError::Backpressure { .. }) => {
                    return Err(WorkerError::LeaseUnavailable {
                        attempts,
                        source: e,
                    })
                }
                Err(e) => return Err(WorkerError::Coordinator(e)),
            }
        }

        Err(WorkerError::Halted)
    }

    async fn timed<T, F>(
        &self,
        operation: &'static str,
        limit: Duration,
        fut: F,
    ) -> Result<T, CollaboratorError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        let started = Instant::now();
        let (result, label) = match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => (Ok(value), "ok"),
            Ok(Err(e)) => {
                let label = if e.is_transient() {
                    "transient"
                } else {
                    "permanent"
                };
                (Err(e), label)
            }
            Err(_) => (
                Err(CollaboratorError::Transient(format!(
                    "{} timed out after {:?}",
                    operation, limit
                ))),
                "timeout",
            ),
        };

        metrics::COLLABORATOR_DURATION
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
        metrics::COLLABORATOR_CALLS
            .with_label_values(&[operation, label])
            .inc();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tokio::sync::watch;
    use uuid::Uuid;

    use crate::coordinator::ConcurrencyCoordinator;
    use crate::key::OrchestrationKey;
    use crate::orchestrator::OrchestratorConfig;
    use crate::state::{SqliteStateStore, StateStore};
    use crate::testing::{fixtures, MockContentProcessor, MockIndexWriter, MockItemCopier};
    use crate::worker::ItemOwner;

    #[derive(Default)]
    struct RecordingOwner {
        completed: StdMutex<Vec<ItemOutcome>>,
        failed: StdMutex<Vec<(ItemOutcome, ItemFailure)>>,
    }

    #[async_trait]
    impl ItemOwner for RecordingOwner {
        async fn on_item_completed(&self, outcome: ItemOutcome) {
            self.completed.lock().unwrap().push(outcome);
        }

        async fn on_item_failed(&self, outcome: ItemOutcome, failure: ItemFailure) {
            self.failed.lock().unwrap().push((outcome, failure));
        }
    }

    struct Setup {
        store: Arc<SqliteStateStore>,
        coordinator: Arc<ConcurrencyCoordinator>,
        copier: Arc<MockItemCopier>,
        processor: Arc<MockContentProcessor>,
        index: Arc<MockIndexWriter>,
        owner: Arc<RecordingOwner>,
        halt_tx: watch::Sender<bool>,
        key: OrchestrationKey,
        config: OrchestratorConfig,
    }

    impl Setup {
        fn new(capacity: u32) -> Self {
            let (halt_tx, _) = watch::channel(false);
            Self {
                store: Arc::new(SqliteStateStore::in_memory().unwrap()),
                coordinator: Arc::new(ConcurrencyCoordinator::new("ingestion", capacity)),
                copier: Arc::new(MockItemCopier::new()),
                processor: Arc::new(MockContentProcessor::new()),
                index: Arc::new(MockIndexWriter::new()),
                owner: Arc::new(RecordingOwner::default()),
                halt_tx,
                key: OrchestrationKey::derive("blobs", "x"),
                config: fixtures::fast_orchestrator_config(),
            }
        }

        fn worker(&self, item: WorkItem) -> Arc<ItemWorker> {
            let ctx = WorkerContext {
                config: self.config.clone(),
                store: self.store.clone(),
                coordinator: self.coordinator.clone(),
                copier: self.copier.clone(),
                processor: self.processor.clone(),
                index: self.index.clone(),
                owner: self.owner.clone(),
                collection: "docs".to_string(),
                halt: self.halt_tx.subscribe(),
            };
            let initial = ItemState {
                id: item.item_id.clone(),
                orchestration_id: self.key.clone(),
                run_id: Uuid::new_v4(),
                item_ref: item.item_ref.clone(),
                source_id: item.source_id.clone(),
                content_hash: item.content_hash.clone(),
                phase: ItemPhase::Queued,
                attempts: 1,
                last_error: None,
                last_activity: Utc::now(),
            };
            Arc::new(ItemWorker::new(ctx, item, initial))
        }
    }

    #[tokio::test]
    async fn test_run_success_persists_and_hands_back_lease() {
        let setup = Setup::new(1);
        let worker = setup.worker(fixtures::work_item("a.txt", "docs"));

        worker.clone().run().await;

        let completed = setup.owner.completed.lock().unwrap().clone();
        assert_eq!(completed.len(), 1);
        assert!(completed[0].lease.is_some());
        assert_eq!(completed[0].attempt, 1);
        assert!(setup.owner.failed.lock().unwrap().is_empty());

        let stored = setup.store.load_item(&setup.key, "a.txt").unwrap().unwrap();
        assert_eq!(stored.phase, ItemPhase::Complete);
        assert!(!worker.is_active().await);

        // lease is still counted until the owner releases it
        assert_eq!(setup.coordinator.status().await.active_weight, 1);
        assert_eq!(setup.index.records("docs").await.len(), 1);
        assert_eq!(setup.index.deleted_files("docs").await, vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_permanent_copy_failure_reports_once() {
        let setup = Setup::new(1);
        setup
            .copier
            .fail_item("a.txt", CollaboratorError::Permanent("unsupported".into()))
            .await;
        let worker = setup.worker(fixtures::work_item("a.txt", "docs"));

        worker.clone().run().await;

        let failed = setup.owner.failed.lock().unwrap().clone();
        assert_eq!(failed.len(), 1);
        assert!(!failed[0].1.transient);
        assert!(failed[0].0.lease.is_some());
        assert!(setup.processor.processed().await.is_empty());

        let stored = setup.store.load_item(&setup.key, "a.txt").unwrap().unwrap();
        assert!(matches!(stored.phase, ItemPhase::Failed { .. }));
    }

    #[tokio::test]
    async fn test_lease_backpressure_exhausted_is_transient_failure() {
        let mut setup = Setup::new(1);
        setup.config.lease_wait_timeout_secs = 0;
        setup.config.lease_acquire_attempts = 2;
        setup.config.lease_retry_backoff_ms = 10;
        setup
            .coordinator
            .acquire("other", 1, Duration::ZERO, Duration::from_secs(60))
            .await
            .unwrap();
        let worker = setup.worker(fixtures::work_item("a.txt", "docs"));

        worker.clone().run().await;

        let failed = setup.owner.failed.lock().unwrap().clone();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].1.transient);
        assert!(failed[0].0.lease.is_none());
        assert!(setup.copier.copied().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_mark_complete_does_not_notify() {
        let setup = Setup::new(1);
        let worker = setup.worker(fixtures::work_item("a.txt", "docs"));

        worker.start().await.unwrap();
        worker.on_copy_completed().await.unwrap();
        worker.on_processing_completed(Vec::new()).await;
        assert!(!worker.mark_complete().await.unwrap());
        assert!(!worker
            .mark_failed(ItemFailure::permanent("late"))
            .await
            .unwrap());

        assert_eq!(setup.owner.completed.lock().unwrap().len(), 1);
        assert!(setup.owner.failed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_illegal_transition_is_not_persisted() {
        let setup = Setup::new(1);
        let worker = setup.worker(fixtures::work_item("a.txt", "docs"));

        let err = worker.on_copy_completed().await.unwrap_err();
        assert!(matches!(err, WorkerError::IllegalTransition { .. }));
        assert!(setup.store.load_item(&setup.key, "a.txt").unwrap().is_none());
        assert_eq!(worker.state().await.phase, ItemPhase::Queued);

        let err = worker.mark_complete().await.unwrap_err();
        assert!(matches!(err, WorkerError::IllegalTransition { .. }));
        assert!(setup.owner.completed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_halt_while_waiting_for_lease_exits_quietly() {
        let setup = Setup::new(1);
        let holder = setup
            .coordinator
            .acquire("other", 1, Duration::ZERO, Duration::from_secs(60))
            .await
            .unwrap();
        let worker = setup.worker(fixtures::work_item("a.txt", "docs"));

        let task = tokio::spawn(worker.clone().run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(setup.coordinator.status().await.queue_length, 1);

        setup.halt_tx.send_replace(true);
        task.await.unwrap();

        assert!(setup.owner.completed.lock().unwrap().is_empty());
        assert!(setup.owner.failed.lock().unwrap().is_empty());

        // the abandoned waiter must not get the freed capacity
        setup.coordinator.release(holder.lease_id).await;
        let status = setup.coordinator.status().await;
        assert_eq!(status.active_weight, 0);
        assert_eq!(status.queue_length, 0);
    }

    #[tokio::test]
    async fn test_halt_after_copy_releases_lease() {
        let setup = Setup::new(1);
        setup
            .copier
            .set_delay(Some(Duration::from_millis(100)))
            .await;
        let worker = setup.worker(fixtures::work_item("a.txt", "docs"));

        let task = tokio::spawn(worker.clone().run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(setup.coordinator.status().await.active_weight, 1);

        setup.halt_tx.send_replace(true);
        task.await.unwrap();

        assert_eq!(setup.coordinator.status().await.active_weight, 0);
        assert!(setup.processor.processed().await.is_empty());
        assert!(setup.owner.completed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_process_timeout_is_transient() {
        let mut setup = Setup::new(1);
        setup.config.process_timeout_secs = 0;
        setup
            .processor
            .set_delay(Some(Duration::from_millis(50)))
            .await;
        let worker = setup.worker(fixtures::work_item("a.txt", "docs"));

        worker.clone().run().await;

        let failed = setup.owner.failed.lock().unwrap().clone();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].1.transient);
        assert!(failed[0].1.message.contains("timed out"));
    }
}
