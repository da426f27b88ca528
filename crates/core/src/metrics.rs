//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestrations (runs, settled items, requeues)
//! - Concurrency coordinators (lease grants, releases, expiry, backpressure)
//! - Collaborators (copy, process, index calls)
//! - Notifications

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Orchestrations
// =============================================================================

/// Runs started.
pub static RUNS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("sluice_runs_started_total", "Total orchestration runs started").unwrap()
});

/// Runs finished by result.
pub static RUNS_COMPLETED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sluice_runs_completed_total",
            "Total orchestration runs finished",
        ),
        &["result"], // "success", "failed", "aborted", "halted"
    )
    .unwrap()
});

/// Items settled by result.
pub static ITEMS_SETTLED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sluice_items_settled_total", "Total items settled"),
        &["result"], // "processed", "skipped", "failed"
    )
    .unwrap()
});

/// Items requeued after a transient failure or stuck-item recovery.
pub static ITEMS_REQUEUED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sluice_items_requeued_total", "Total item requeues"),
        &["reason"], // "transient", "stuck"
    )
    .unwrap()
});

/// Scheduler ticks by outcome.
pub static SCHEDULED_STARTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sluice_scheduled_starts_total", "Total scheduler ticks"),
        &["outcome"], // "started", "already_running", "error"
    )
    .unwrap()
});

// =============================================================================
// Concurrency coordinators
// =============================================================================

pub static LEASES_GRANTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sluice_leases_granted_total", "Total leases granted"),
        &["category"],
    )
    .unwrap()
});

pub static LEASES_RELEASED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sluice_leases_released_total", "Total leases released"),
        &["category"],
    )
    .unwrap()
});

pub static LEASES_EXPIRED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sluice_leases_expired_total",
            "Total leases reclaimed after their TTL",
        ),
        &["category"],
    )
    .unwrap()
});

/// Acquire calls refused with backpressure.
pub static LEASE_BACKPRESSURE: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sluice_lease_backpressure_total",
            "Total acquire calls refused with backpressure",
        ),
        &["category", "reason"], // reason: "no_wait", "timeout"
    )
    .unwrap()
});

/// Time spent waiting in the queue before a grant.
pub static LEASE_WAIT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "sluice_lease_wait_duration_seconds",
            "Time spent queued before a lease was granted",
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 1800.0]),
        &["category"],
    )
    .unwrap()
});

// =============================================================================
// Collaborators
// =============================================================================

/// Collaborator call duration in seconds.
pub static COLLABORATOR_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "sluice_collaborator_duration_seconds",
            "Duration of collaborator calls",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["operation"], // "enumerate", "copy", "process", "index"
    )
    .unwrap()
});

/// Collaborator calls by result.
pub static COLLABORATOR_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sluice_collaborator_calls_total", "Total collaborator calls"),
        &["operation", "result"], // result: "ok", "transient", "permanent", "timeout"
    )
    .unwrap()
});

// =============================================================================
// Notifications
// =============================================================================

pub static NOTIFICATIONS_DISPATCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sluice_notifications_dispatched_total",
            "Total notifications dispatched",
        ),
        &["kind"],
    )
    .unwrap()
});

pub static NOTIFICATIONS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "sluice_notifications_dropped_total",
        "Notifications dropped because the buffer was full or closed",
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Orchestrations
        Box::new(RUNS_STARTED.clone()),
        Box::new(RUNS_COMPLETED.clone()),
        Box::new(ITEMS_SETTLED.clone()),
        Box::new(ITEMS_REQUEUED.clone()),
        Box::new(SCHEDULED_STARTS.clone()),
        // Coordinators
        Box::new(LEASES_GRANTED.clone()),
        Box::new(LEASES_RELEASED.clone()),
        Box::new(LEASES_EXPIRED.clone()),
        Box::new(LEASE_BACKPRESSURE.clone()),
        Box::new(LEASE_WAIT_DURATION.clone()),
        // Collaborators
        Box::new(COLLABORATOR_DURATION.clone()),
        Box::new(COLLABORATOR_CALLS.clone()),
        // Notifications
        Box::new(NOTIFICATIONS_DISPATCHED.clone()),
        Box::new(NOTIFICATIONS_DROPPED.clone()),
    ]
}
