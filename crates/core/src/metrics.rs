//! Prometheus metrics for the pipeline engine.
//!
//! Collectors are process-wide statics; call [`all_metrics`] to register them
//! in a registry of your choice.

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Jobs
// =============================================================================

/// Jobs finished, by result.
pub static JOBS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gleaner_jobs_total", "Total jobs finished"),
        &["result"], // "done", "cached", "error", "cancelled"
    )
    .unwrap()
});

/// Attempt outcomes as seen by the worker.
pub static ATTEMPTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gleaner_attempts_total", "Total processing attempts"),
        &["outcome"], // "success", "retryable", "non_retryable"
    )
    .unwrap()
});

/// Time spent per stage.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "gleaner_stage_duration_seconds",
            "Duration of individual pipeline stages",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
        &["kind", "stage"],
    )
    .unwrap()
});

/// Jobs currently being processed.
pub static JOBS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("gleaner_jobs_active", "Jobs currently being processed").unwrap()
});

// =============================================================================
// Batches
// =============================================================================

/// Batch items, by result.
pub static BATCH_ITEMS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gleaner_batch_items_total", "Total batch items processed"),
        &["result"], // "succeeded", "failed"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(JOBS_TOTAL.clone()),
        Box::new(ATTEMPTS_TOTAL.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(JOBS_ACTIVE.clone()),
        Box::new(BATCH_ITEMS_TOTAL.clone()),
    ]
}

/// Register every collector in `registry`.
pub fn register(registry: &prometheus::Registry) -> prometheus::Result<()> {
    for metric in all_metrics() {
        registry.register(metric)?;
    }
    Ok(())
}

/// Observe how long a stage took, labelled by job kind.
pub fn observe_stage(kind: &str, stage: &str, started: std::time::Instant) {
    STAGE_DURATION
        .with_label_values(&[kind, stage])
        .observe(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register() {
        let registry = prometheus::Registry::new();
        register(&registry).unwrap();
        JOBS_TOTAL.with_label_values(&["done"]).inc();
        let families = registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "gleaner_jobs_total"));
    }
}
