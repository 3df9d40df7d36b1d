//! Prometheus metrics for the conversion engine.
//!
//! This module provides metrics for:
//! - Conversions (results, failure kinds, durations, bytes)
//! - Cache (lookups, stores)
//! - Adapters (invocations by outcome)
//! - Retries and input leases

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Conversion Metrics
// =============================================================================

/// Conversions total by result.
pub static CONVERSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("metamorph_conversions_total", "Total conversions processed"),
        &["result"], // "success", "failure", "planned"
    )
    .unwrap()
});

/// Failed conversions by error kind.
pub static CONVERSION_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "metamorph_conversion_failures_total",
            "Failed conversions by error kind",
        ),
        &["kind"],
    )
    .unwrap()
});

/// Conversion duration in seconds.
pub static CONVERSION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "metamorph_conversion_duration_seconds",
            "Duration of a conversion job",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["strategy"], // "identity", "direct", "chain", "cached"
    )
    .unwrap()
});

/// Input bytes successfully converted.
pub static BYTES_PROCESSED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "metamorph_bytes_processed_total",
        "Input bytes of successful conversions",
    )
    .unwrap()
});

// =============================================================================
// Cache Metrics
// =============================================================================

/// Cache lookups by outcome.
pub static CACHE_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("metamorph_cache_lookups_total", "Artifact cache lookups"),
        &["outcome"], // "hit", "miss", "expired"
    )
    .unwrap()
});

/// Cache stores by result.
pub static CACHE_STORES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("metamorph_cache_stores_total", "Artifact cache stores"),
        &["result"], // "success", "failure"
    )
    .unwrap()
});

// =============================================================================
// Adapter Metrics
// =============================================================================

/// Adapter invocations by adapter and outcome.
pub static ADAPTER_INVOCATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "metamorph_adapter_invocations_total",
            "External tool invocations",
        ),
        &["adapter", "outcome"], // "success", "failure", "timeout", "cancelled"
    )
    .unwrap()
});

// =============================================================================
// Retry and Lock Metrics
// =============================================================================

/// Retries scheduled by the error kind that triggered them.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("metamorph_retry_attempts_total", "Retries after transient failures"),
        &["kind"],
    )
    .unwrap()
});

/// Lease acquisitions refused because another job holds the input.
pub static LOCK_CONTENTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "metamorph_lock_contentions_total",
        "Input leases refused due to contention",
    )
    .unwrap()
});

/// Expired leases taken over from a dead owner.
pub static LEASES_RECLAIMED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("metamorph_leases_reclaimed_total", "Stale input leases reclaimed").unwrap()
});

/// Returns all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Conversions
        Box::new(CONVERSIONS_TOTAL.clone()),
        Box::new(CONVERSION_FAILURES.clone()),
        Box::new(CONVERSION_DURATION.clone()),
        Box::new(BYTES_PROCESSED.clone()),
        // Cache
        Box::new(CACHE_LOOKUPS.clone()),
        Box::new(CACHE_STORES.clone()),
        // Adapters
        Box::new(ADAPTER_INVOCATIONS.clone()),
        // Retries and locks
        Box::new(RETRY_ATTEMPTS.clone()),
        Box::new(LOCK_CONTENTIONS.clone()),
        Box::new(LEASES_RECLAIMED.clone()),
    ]
}
