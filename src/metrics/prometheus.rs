//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by the preview scheduler
//! and provides functions for initializing, registering, and exporting them.

use prometheus::{CounterVec, Encoder, GaugeVec, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all preview metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Generated assets created, labeled by renderer kind and admission outcome.
pub static WORK_CREATED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Finished renders, labeled by renderer kind and final status label.
pub static RENDERS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Render duration in seconds, labeled by renderer kind.
pub static RENDER_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Ids currently holding a capacity slot, labeled by renderer kind.
pub static ACTIVE_WORK: OnceLock<GaugeVec> = OnceLock::new();

/// Assets claimed by the periodic sweep, labeled by renderer kind.
pub static SWEEP_CLAIMED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls leave the first registration in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
///
/// # Example
///
/// ```ignore
/// use preview::metrics::init_metrics;
///
/// init_metrics()?;
/// ```
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let work_created_total = CounterVec::new(
        Opts::new(
            "preview_work_created_total",
            "Generated assets created by admission",
        ),
        &["kind", "admission"],
    )?;

    let renders_total = CounterVec::new(
        Opts::new("preview_renders_total", "Renders finished by workers"),
        &["kind", "status"],
    )?;

    let render_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "preview_render_duration_seconds",
            "Render duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 15.0, 60.0, 300.0]),
        &["kind"],
    )?;

    let active_work = GaugeVec::new(
        Opts::new("preview_active_work", "Ids holding a capacity slot"),
        &["kind"],
    )?;

    let sweep_claimed_total = CounterVec::new(
        Opts::new(
            "preview_sweep_claimed_total",
            "Waiting assets claimed by the sweep",
        ),
        &["kind"],
    )?;

    registry.register(Box::new(work_created_total.clone()))?;
    registry.register(Box::new(renders_total.clone()))?;
    registry.register(Box::new(render_duration.clone()))?;
    registry.register(Box::new(active_work.clone()))?;
    registry.register(Box::new(sweep_claimed_total.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = WORK_CREATED_TOTAL.set(work_created_total);
    let _ = RENDERS_TOTAL.set(renders_total);
    let _ = RENDER_DURATION.set(render_duration);
    let _ = ACTIVE_WORK.set(active_work);
    let _ = SWEEP_CLAIMED_TOTAL.set(sweep_claimed_total);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        let metrics = export_metrics();
        assert!(!metrics.is_empty());
        if REGISTRY.get().is_some() {
            assert!(!metrics.starts_with("# Error"));
        }
    }
}
