//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Dispatcher (leases, in-flight jobs, job outcomes)
//! - Pipeline stages (durations, failures)
//! - Storage gateway requests

use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts};

use crate::storage::StorageError;

// =============================================================================
// Dispatcher Metrics
// =============================================================================

/// Lease attempts by result.
pub static LEASES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pixelq_leases_total", "Total queue lease attempts"),
        &["result"], // "leased", "empty", "error", "poison", "deferred"
    )
    .unwrap()
});

/// Jobs currently held by a pipeline controller.
pub static JOBS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "pixelq_jobs_in_flight",
        "Number of jobs currently being processed",
    )
    .unwrap()
});

/// Finished jobs by terminal status.
pub static JOBS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pixelq_jobs_total", "Total jobs that reached a terminal status"),
        &["result"], // "done", "failed"
    )
    .unwrap()
});

/// Job duration in seconds, lease to terminal status.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("pixelq_job_duration_seconds", "Duration of whole jobs").buckets(
            vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0],
        ),
        &["result"],
    )
    .unwrap()
});

// =============================================================================
// Stage Metrics
// =============================================================================

/// Stage duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "pixelq_stage_duration_seconds",
            "Duration of external stage processes",
        )
        .buckets(vec![
            1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0,
        ]),
        &["stage"], // "render", "upscale", "compose"
    )
    .unwrap()
});

/// Stage failures by stage.
pub static STAGE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pixelq_stage_failures_total", "Total failed stage runs"),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Storage Metrics
// =============================================================================

/// Storage gateway requests by operation and outcome.
pub static STORAGE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pixelq_storage_requests_total",
            "Total storage gateway requests",
        ),
        &["operation", "status"], // status: "success" or the error kind
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

pub fn record_storage_request(operation: &str, error: Option<&StorageError>) {
    let status = error.map(StorageError::kind).unwrap_or("success");
    STORAGE_REQUESTS
        .with_label_values(&[operation, status])
        .inc();
}

pub fn record_stage(stage: &str, elapsed: Option<Duration>) {
    match elapsed {
        Some(elapsed) => STAGE_DURATION
            .with_label_values(&[stage])
            .observe(elapsed.as_secs_f64()),
        None => STAGE_FAILURES.with_label_values(&[stage]).inc(),
    }
}

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(LEASES_TOTAL.clone()),
        Box::new(JOBS_IN_FLIGHT.clone()),
        Box::new(JOBS_TOTAL.clone()),
        Box::new(JOB_DURATION.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(STAGE_FAILURES.clone()),
        Box::new(STORAGE_REQUESTS.clone()),
    ]
}
