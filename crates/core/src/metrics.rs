//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Intake (trigger events, rejections, live passes)
//! - Stage execution (runs by outcome, durations, concurrency)
//! - Publishing (notifications sent and failed)

use once_cell::sync::Lazy;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
};

// =============================================================================
// Intake
// =============================================================================

/// Trigger events by how the tracker handled them.
pub static PASS_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("modis_runner_pass_events_total", "Trigger events ingested"),
        &["disposition"], // "created", "merged", "duplicate", "ignored"
    )
    .unwrap()
});

/// Messages rejected before reaching the tracker.
pub static TRIGGERS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "modis_runner_triggers_rejected_total",
            "Trigger messages rejected at validation",
        ),
        &["reason"],
    )
    .unwrap()
});

/// Passes currently held by the tracker.
pub static LIVE_PASSES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("modis_runner_live_passes", "Passes currently in flight").unwrap()
});

/// Passes that reached a terminal status.
pub static PASSES_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("modis_runner_passes_finished_total", "Passes finished"),
        &["result"], // "succeeded", "failed", "aborted", "abandoned"
    )
    .unwrap()
});

// =============================================================================
// Stages
// =============================================================================

/// Stage attempts by outcome.
pub static STAGE_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("modis_runner_stage_runs_total", "Stage attempts"),
        &["stage", "outcome"],
    )
    .unwrap()
});

/// Wall time of stage attempts in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "modis_runner_stage_duration_seconds",
            "Duration of stage attempts",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["stage"],
    )
    .unwrap()
});

/// Stage attempts currently running.
pub static RUNNING_STAGES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("modis_runner_running_stages", "Stage attempts in flight").unwrap()
});

// =============================================================================
// Publishing
// =============================================================================

/// Notifications sent by product.
pub static PRODUCTS_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "modis_runner_products_published_total",
            "Product notifications published",
        ),
        &["product"],
    )
    .unwrap()
});

/// Notifications the sink refused.
pub static PUBLISH_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "modis_runner_publish_failures_total",
        "Product notifications that failed to publish",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(PASS_EVENTS.clone()),
        Box::new(TRIGGERS_REJECTED.clone()),
        Box::new(LIVE_PASSES.clone()),
        Box::new(PASSES_FINISHED.clone()),
        Box::new(STAGE_RUNS.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(RUNNING_STAGES.clone()),
        Box::new(PRODUCTS_PUBLISHED.clone()),
        Box::new(PUBLISH_FAILURES.clone()),
    ]
}
