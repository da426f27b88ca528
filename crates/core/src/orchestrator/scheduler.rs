//! Periodic runs for configured sources.
//!
//! Each scheduled job re-submits its descriptor on a fixed interval. A tick
//! that lands while the previous run is still going collapses into
//! [`StartOutcome::AlreadyRunning`], so jobs never overlap themselves.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::registry::ControllerRegistry;
use super::types::{OrchestratorError, StartOutcome};
use crate::key::OrchestrationKey;
use crate::metrics;
use crate::state::{RunMode, SourceDescriptor};

/// `[schedule]` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Fire every job once at startup instead of after its first interval.
    #[serde(default = "default_run_on_startup")]
    pub run_on_startup: bool,

    #[serde(default)]
    pub jobs: Vec<ScheduledJob>,
}

fn default_run_on_startup() -> bool {
    true
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            run_on_startup: default_run_on_startup(),
            jobs: Vec::new(),
        }
    }
}

/// One source started on a fixed interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub category: String,
    pub qualifier: String,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub interval_secs: u64,
}

impl ScheduledJob {
    pub fn new(category: impl Into<String>, qualifier: impl Into<String>, interval_secs: u64) -> Self {
        Self {
            category: category.into(),
            qualifier: qualifier.into(),
            mode: RunMode::Ingest,
            collection: None,
            interval_secs,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn descriptor(&self) -> SourceDescriptor {
        let mut descriptor = SourceDescriptor::new(&self.category, &self.qualifier)
            .with_mode(self.mode)
            .with_reason(format!("scheduled every {}s", self.interval_secs));
        descriptor.collection = self.collection.clone();
        descriptor
    }

    pub fn key(&self) -> OrchestrationKey {
        OrchestrationKey::derive(&self.category, &self.qualifier)
    }

    /// Returns a description of the first problem found, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("interval_secs cannot be 0".to_string());
        }
        self.descriptor().validate()
    }
}

/// Submit one job's descriptor to the registry.
pub async fn fire(
    registry: &ControllerRegistry,
    job: &ScheduledJob,
) -> Result<StartOutcome, OrchestratorError> {
    let result = registry.start(job.descriptor()).await;
    let label = match &result {
        Ok((_, StartOutcome::Started)) => "started",
        Ok((_, StartOutcome::AlreadyRunning)) => "already_running",
        Err(_) => "error",
    };
    metrics::SCHEDULED_STARTS.with_label_values(&[label]).inc();
    result.map(|(_, outcome)| outcome)
}

/// Drive every configured job until shutdown. Each job ticks on its own
/// interval; the returned handle finishes once all of them have stopped.
pub fn spawn_scheduler(
    registry: Arc<ControllerRegistry>,
    schedule: ScheduleConfig,
    shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if schedule.jobs.is_empty() {
            debug!("No scheduled jobs configured");
            return;
        }
        info!("Scheduler started with {} jobs", schedule.jobs.len());

        let run_on_startup = schedule.run_on_startup;
        let tasks: Vec<_> = schedule
            .jobs
            .into_iter()
            .map(|job| {
                tokio::spawn(run_job(
                    Arc::clone(&registry),
                    job,
                    run_on_startup,
                    shutdown_rx.resubscribe(),
                ))
            })
            .collect();
        drop(shutdown_rx);

        join_all(tasks).await;
        info!("Scheduler shutting down");
    })
}

async fn run_job(
    registry: Arc<ControllerRegistry>,
    job: ScheduledJob,
    run_on_startup: bool,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let key = job.key();
    let mut ticker = tokio::time::interval(job.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    if !run_on_startup {
        ticker.tick().await;
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                match fire(&registry, &job).await {
                    Ok(StartOutcome::Started) => info!("Scheduled run started for {}", key),
                    Ok(StartOutcome::AlreadyRunning) => {
                        debug!("Scheduled run for {} skipped, previous run still going", key)
                    }
                    Err(e) => warn!("Scheduled run for {} failed to start: {}", key, e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{self, TestHarness};

    async fn harness_with_items(count: usize) -> TestHarness {
        let harness = TestHarness::new();
        harness
            .enumerator
            .set_items("blobs", "nightly", fixtures::work_items("docs", count))
            .await;
        harness
    }

    fn job(interval_secs: u64) -> ScheduledJob {
        ScheduledJob::new("blobs", "nightly", interval_secs)
    }

    #[test]
    fn test_deserialize_schedule() {
        let toml = r#"
            run_on_startup = false

            [[jobs]]
            category = "blobs"
            qualifier = "nightly"
            interval_secs = 3600

            [[jobs]]
            category = "mail"
            qualifier = "archive"
            mode = "reindex"
            collection = "mail_all"
            interval_secs = 86400
        "#;
        let schedule: ScheduleConfig = toml::from_str(toml).unwrap();
        assert!(!schedule.run_on_startup);
        assert_eq!(schedule.jobs.len(), 2);
        assert_eq!(schedule.jobs[0].mode, RunMode::Ingest);
        assert_eq!(schedule.jobs[0].interval(), Duration::from_secs(3600));

        let descriptor = schedule.jobs[1].descriptor();
        assert_eq!(descriptor.mode, RunMode::Reindex);
        assert_eq!(descriptor.collection_name(), "mail_all");
        assert_eq!(descriptor.reason, "scheduled every 86400s");
    }

    #[test]
    fn test_deserialize_empty_schedule() {
        let schedule: ScheduleConfig = toml::from_str("").unwrap();
        assert_eq!(schedule, ScheduleConfig::default());
        assert!(schedule.run_on_startup);
    }

    #[test]
    fn test_validate_job() {
        assert!(job(60).validate().is_ok());
        assert!(job(0).validate().unwrap_err().contains("interval_secs"));
        assert!(ScheduledJob::new("", "nightly", 60).validate().is_err());
    }

    #[tokio::test]
    async fn test_tick_starts_run() {
        let harness = harness_with_items(2).await;
        let registry = harness.registry();

        let outcome = fire(&registry, &job(60)).await.unwrap();
        assert_eq!(outcome, StartOutcome::Started);
        assert!(harness.wait_for("run_completed", 1).await);

        let snapshot = registry.snapshot(&job(60).key()).await.unwrap().unwrap();
        assert_eq!(snapshot.state.processed, 2);
        assert_eq!(snapshot.state.reason, "scheduled every 60s");
    }

    #[tokio::test]
    async fn test_tick_during_run_is_noop() {
        let harness = harness_with_items(3).await;
        harness.processor.hang_item("item-2.txt").await;
        let registry = harness.registry();

        assert_eq!(fire(&registry, &job(60)).await.unwrap(), StartOutcome::Started);
        assert!(harness.wait_for("run_started", 1).await);
        let before = registry.snapshot(&job(60).key()).await.unwrap().unwrap();

        assert_eq!(
            fire(&registry, &job(60)).await.unwrap(),
            StartOutcome::AlreadyRunning
        );

        let after = registry.snapshot(&job(60).key()).await.unwrap().unwrap();
        assert!(after.running);
        assert_eq!(after.state.run_id, before.state.run_id);
        assert_eq!(harness.enumerator.calls().await.len(), 1);
        assert_eq!(harness.sink.count("run_started").await, 1);

        registry
            .get_active(&job(60).key())
            .await
            .unwrap()
            .force_reset()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_fires_on_startup_and_skips_running_run() {
        let harness = harness_with_items(2).await;
        harness.processor.hang_item("item-1.txt").await;
        let registry = harness.registry();
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let schedule = ScheduleConfig {
            run_on_startup: true,
            jobs: vec![job(1)],
        };
        let handle = spawn_scheduler(Arc::clone(&registry), schedule, shutdown_tx.subscribe());

        assert!(harness.wait_for("run_started", 1).await);
        // at least one more tick lands while the item hangs
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(harness.sink.count("run_started").await, 1);
        assert_eq!(harness.enumerator.calls().await.len(), 1);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        registry
            .get_active(&job(1).key())
            .await
            .unwrap()
            .force_reset()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_starts_again_after_run_finishes() {
        let harness = harness_with_items(1).await;
        let registry = harness.registry();
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let handle = spawn_scheduler(
            Arc::clone(&registry),
            ScheduleConfig {
                run_on_startup: true,
                jobs: vec![job(1)],
            },
            shutdown_tx.subscribe(),
        );

        assert!(harness.wait_for("run_completed", 2).await);
        assert!(harness.enumerator.calls().await.len() >= 2);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_without_startup_run_waits_one_interval() {
        let harness = harness_with_items(1).await;
        let registry = harness.registry();
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let handle = spawn_scheduler(
            Arc::clone(&registry),
            ScheduleConfig {
                run_on_startup: false,
                jobs: vec![job(1)],
            },
            shutdown_tx.subscribe(),
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(harness.enumerator.calls().await.is_empty());
        assert!(harness.wait_for("run_completed", 1).await);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_with_no_jobs_exits() {
        let harness = TestHarness::new();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let handle = spawn_scheduler(harness.registry(), ScheduleConfig::default(), shutdown_rx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
