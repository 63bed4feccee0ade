//! Metrics module
//!
//! Publishes entry cache reports as Prometheus gauges.

mod exporter;

pub use exporter::CacheMetricsExporter;
