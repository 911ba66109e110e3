//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks admission, render outcomes, capacity use and sweep activity.
//!
//! # Example
//!
//! ```ignore
//! use preview::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics()?;
//!
//! let collector = MetricsCollector::new();
//! collector.record_render("imageMagickRenderAgent", "complete", 0.8);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORK, REGISTRY, RENDERS_TOTAL, RENDER_DURATION, SWEEP_CLAIMED_TOTAL,
    WORK_CREATED_TOTAL,
};
