//! Notification persistence integration tests.

use sluice_core::notify::{NotificationEvent, NotificationFilter, NotificationStore};
use sluice_core::testing::fixtures::{self, TestHarness};
use sluice_core::SourceDescriptor;

#[tokio::test]
async fn test_run_notifications_are_persisted_in_order() {
    let harness = TestHarness::new();
    harness
        .enumerator
        .set_items("blobs", "batch", fixtures::work_items("docs", 2))
        .await;
    let registry = harness.registry();

    let (key, _) = registry
        .start(SourceDescriptor::new("blobs", "batch"))
        .await
        .unwrap();
    assert!(harness.wait_for("run_completed", 1).await);

    let filter = NotificationFilter::new().with_orchestration_id(key.as_str());
    let records = harness.notifications.query(&filter).unwrap();
    // newest first
    let kinds: Vec<_> = records.iter().rev().map(|r| r.kind.as_str()).collect();
    assert_eq!(
        kinds,
        vec!["run_started", "run_progress", "run_progress", "run_completed"]
    );
    assert!(records.windows(2).all(|w| w[0].id > w[1].id));

    let started = records.last().unwrap();
    assert!(matches!(
        &started.data,
        NotificationEvent::RunStarted { descriptor, .. } if descriptor.qualifier == "batch"
    ));
}

#[tokio::test]
async fn test_notifications_filter_by_kind() {
    let harness = TestHarness::new();
    harness
        .enumerator
        .set_items("blobs", "a", fixtures::work_items("docs", 1))
        .await;
    let registry = harness.registry();
    registry.start(SourceDescriptor::new("blobs", "a")).await.unwrap();
    registry.start(SourceDescriptor::new("blobs", "b")).await.unwrap();
    assert!(harness.wait_for("run_completed", 2).await);

    let filter = NotificationFilter::new().with_kind("run_completed");
    assert_eq!(harness.notifications.count(&filter).unwrap(), 2);

    let other = SourceDescriptor::new("blobs", "b").key();
    let filter = NotificationFilter::new()
        .with_orchestration_id(other.as_str())
        .with_kind("run_progress");
    // empty source: completion without progress
    assert_eq!(harness.notifications.count(&filter).unwrap(), 0);
}
