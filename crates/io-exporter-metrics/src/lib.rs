//! io-exporter metrics
//!
//! - **ProbeMetrics**: last-value gauges fed by the probe scheduler
//! - **PrometheusExporter**: renders them in the Prometheus text format
//! - **process**: optional resource usage of the exporter itself

pub mod metrics;
pub mod process;

pub use metrics::{PrometheusExporter, ProbeMetrics, Snapshot, escape_label_value};
pub use process::ProcessStats;
