//! Prometheus metrics.
//!
//! This module provides metrics for:
//! - Decision policy outcomes per granularity
//! - Hierarchical rollups
//! - Remote library requests
//! - Scan runs
//!
//! There is no HTTP endpoint; [`encode_metrics`] renders the text format so
//! callers can write it to a node-exporter textfile.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    for metric in all_metrics() {
        registry.register(metric).unwrap();
    }
    registry
});

// =============================================================================
// Decisions
// =============================================================================

/// Decision policy outcomes.
pub static DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "unmonitarr_decisions_total",
            "Decision policy outcomes by granularity and action",
        ),
        &["granularity", "action"], // "unmonitor", "keep", "no_file", ...
    )
    .unwrap()
});

/// Season and series transitions.
pub static ROLLUPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "unmonitarr_rollups_total",
            "Hierarchical rollups by level and outcome",
        ),
        &["level", "outcome"], // "unmonitored", "simulated", "reconciled", "failed"
    )
    .unwrap()
});

// =============================================================================
// External services
// =============================================================================

/// Requests sent to the library managers.
pub static REMOTE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "unmonitarr_remote_requests_total",
            "Requests to library managers by service, method and outcome",
        ),
        &["service", "method", "outcome"],
    )
    .unwrap()
});

// =============================================================================
// Scans
// =============================================================================

/// Scan duration in seconds.
pub static SCAN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("unmonitarr_scan_duration_seconds", "Duration of a scan")
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0, 1800.0]),
        &["mode"],
    )
    .unwrap()
});

/// Unix time of the last scan that committed state.
pub static LAST_SCAN_TIMESTAMP: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "unmonitarr_last_scan_timestamp_seconds",
        "Unix time of the last completed scan",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(DECISIONS_TOTAL.clone()),
        Box::new(ROLLUPS_TOTAL.clone()),
        Box::new(REMOTE_REQUESTS.clone()),
        Box::new(SCAN_DURATION.clone()),
        Box::new(LAST_SCAN_TIMESTAMP.clone()),
    ]
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
