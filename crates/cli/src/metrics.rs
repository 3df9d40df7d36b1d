//! Prometheus metrics export.
//!
//! The conversion metrics live in `metamorph_core::metrics`; this module adds
//! run-level gauges, registers everything in one registry, and writes the
//! text exposition to a file for a node-exporter textfile collector.

use std::path::Path;

use once_cell::sync::Lazy;
use prometheus::{self, Encoder, IntGauge, Registry, TextEncoder};

use metamorph_core::{SchedulerStatus, StatsRecord};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// Scheduler Metrics (collected at the end of a run)
// =============================================================================

/// Worker count of the last run.
pub static SCHEDULER_WORKERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("metamorph_scheduler_workers", "Configured worker count").unwrap()
});

/// Jobs processed by the scheduler.
pub static SCHEDULER_PROCESSED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "metamorph_scheduler_jobs_processed",
        "Jobs processed in the last run",
    )
    .unwrap()
});

/// Jobs that ended in failure.
pub static SCHEDULER_FAILED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "metamorph_scheduler_jobs_failed",
        "Jobs that failed in the last run",
    )
    .unwrap()
});

/// Whether the run was cancelled (1) or ran to completion (0).
pub static SCHEDULER_CANCELLED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "metamorph_scheduler_cancelled",
        "Whether the last run was cancelled",
    )
    .unwrap()
});

// =============================================================================
// Adapter and Stats Metrics
// =============================================================================

/// Adapters found installed at startup.
pub static ADAPTERS_AVAILABLE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "metamorph_adapters_available",
        "Converter tools found installed",
    )
    .unwrap()
});

/// Lifetime successful conversions from the persisted stats.
pub static LIFETIME_CONVERSIONS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "metamorph_lifetime_conversions",
        "Successful conversions across all runs",
    )
    .unwrap()
});

/// Lifetime failures from the persisted stats.
pub static LIFETIME_FAILURES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "metamorph_lifetime_failures",
        "Failed conversions across all runs",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // Scheduler
    registry
        .register(Box::new(SCHEDULER_WORKERS.clone()))
        .unwrap();
    registry
        .register(Box::new(SCHEDULER_PROCESSED.clone()))
        .unwrap();
    registry
        .register(Box::new(SCHEDULER_FAILED.clone()))
        .unwrap();
    registry
        .register(Box::new(SCHEDULER_CANCELLED.clone()))
        .unwrap();

    // Adapters and stats
    registry
        .register(Box::new(ADAPTERS_AVAILABLE.clone()))
        .unwrap();
    registry
        .register(Box::new(LIFETIME_CONVERSIONS.clone()))
        .unwrap();
    registry
        .register(Box::new(LIFETIME_FAILURES.clone()))
        .unwrap();

    // Core metrics (conversions, cache, adapters, retries, locks)
    for metric in metamorph_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Copies end-of-run state into the gauges.
pub fn collect_run_metrics(status: &SchedulerStatus, stats: Option<&StatsRecord>) {
    SCHEDULER_WORKERS.set(status.max_concurrency as i64);
    SCHEDULER_PROCESSED.set(status.total_processed as i64);
    SCHEDULER_FAILED.set(status.total_failed as i64);
    SCHEDULER_CANCELLED.set(if status.cancelled { 1 } else { 0 });

    if let Some(stats) = stats {
        LIFETIME_CONVERSIONS.set(stats.conversions as i64);
        LIFETIME_FAILURES.set(stats.failures as i64);
    }
}

/// Encode all metrics as Prometheus text format.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Writes the exposition next to `path` and renames it into place, so a
/// collector never reads a half-written file.
pub async fn write_metrics_file(path: &Path) -> anyhow::Result<()> {
    let text = gather_text()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("prom.tmp");
    tokio::fs::write(&tmp, text).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
