//! Recording helpers over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`super::init_metrics`] has run, so library
//! code and tests can record unconditionally.

use super::prometheus::{
    ACTIVE_WORK, RENDERS_TOTAL, RENDER_DURATION, SWEEP_CLAIMED_TOTAL, WORK_CREATED_TOTAL,
};

/// Metrics collector for scheduler and worker events.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a created generated asset.
    ///
    /// # Arguments
    ///
    /// * `kind` - Renderer kind the asset routes to
    /// * `scheduled` - Whether admission dispatched it immediately
    pub fn record_work_created(&self, kind: &str, scheduled: bool) {
        let admission = if scheduled { "scheduled" } else { "waiting" };
        if let Some(created) = WORK_CREATED_TOTAL.get() {
            created.with_label_values(&[kind, admission]).inc();
        }

        tracing::trace!(kind = kind, admission = admission, "Recorded work metric");
    }

    /// Record a finished render with its final status label.
    pub fn record_render(&self, kind: &str, status: &str, duration_secs: f64) {
        if let Some(renders) = RENDERS_TOTAL.get() {
            renders.with_label_values(&[kind, status]).inc();
        }

        if let Some(duration) = RENDER_DURATION.get() {
            duration.with_label_values(&[kind]).observe(duration_secs);
        }

        tracing::trace!(
            kind = kind,
            status = status,
            duration_secs = duration_secs,
            "Recorded render metric"
        );
    }

    /// Set the number of ids holding a capacity slot for `kind`.
    pub fn set_active_work(&self, kind: &str, count: usize) {
        if let Some(active) = ACTIVE_WORK.get() {
            active.with_label_values(&[kind]).set(count as f64);
        }
    }

    pub fn record_sweep_claimed(&self, kind: &str, claimed: usize) {
        if claimed == 0 {
            return;
        }
        if let Some(swept) = SWEEP_CLAIMED_TOTAL.get() {
            swept.with_label_values(&[kind]).inc_by(claimed as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_recording_before_init_is_noop() {
        let collector = MetricsCollector::new();
        collector.record_work_created("imageMagickRenderAgent", true);
        collector.record_render("imageMagickRenderAgent", "complete", 0.5);
        collector.set_active_work("imageMagickRenderAgent", 3);
        collector.record_sweep_claimed("imageMagickRenderAgent", 0);
    }

    #[test]
    fn test_recorded_metrics_are_exported() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();
        collector.record_work_created("documentRenderAgent", false);
        collector.record_render("documentRenderAgent", "failed", 1.5);
        collector.record_sweep_claimed("documentRenderAgent", 2);

        let text = export_metrics();
        assert!(text.contains("preview_work_created_total"));
        assert!(text.contains("preview_renders_total"));
        assert!(text.contains("preview_sweep_claimed_total"));
    }
}
