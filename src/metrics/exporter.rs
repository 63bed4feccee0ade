//! Prometheus exporter for entry cache reports
//!
//! Each [`CacheReport`] produced by a stats refresh overwrites the gauges,
//! so a scrape always sees the most recently closed window.

use prometheus::{Encoder, Gauge, IntGauge, Opts, Registry, TextEncoder};
use tracing::debug;

use crate::cache::CacheReport;

const NAMESPACE: &str = "ledger_cache";

/// Gauges mirroring the fields of a [`CacheReport`]
pub struct CacheMetricsExporter {
    registry: Registry,
    max_size: IntGauge,
    used_size: IntGauge,
    entries_count: IntGauge,
    hits_rate: Gauge,
    misses_rate: Gauge,
    hits_throughput: Gauge,
    misses_throughput: Gauge,
    eviction_count: IntGauge,
    inserted_entries: IntGauge,
    evicted_entries: IntGauge,
    hit_ratio: Gauge,
}

impl CacheMetricsExporter {
    /// Create the gauges and register them in a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create the gauges and register them in `registry`
    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let exporter = Self {
            max_size: int_gauge("max_size_bytes", "Configured cache budget")?,
            used_size: int_gauge("used_size_bytes", "Bytes held across all ledger caches")?,
            entries_count: int_gauge("entries", "Entries held across all ledger caches")?,
            hits_rate: gauge("hits_per_second", "Cache hits per second over the last window")?,
            misses_rate: gauge("misses_per_second", "Cache misses per second over the last window")?,
            hits_throughput: gauge("hit_bytes_per_second", "Bytes served from cache per second")?,
            misses_throughput: gauge("miss_bytes_per_second", "Bytes read from storage on a miss per second")?,
            eviction_count: int_gauge("eviction_passes", "Size-triggered eviction passes since start")?,
            inserted_entries: int_gauge("inserted_entries", "Entries admitted since start")?,
            evicted_entries: int_gauge("evicted_entries", "Entries removed since start")?,
            hit_ratio: gauge("hit_ratio", "Lifetime hit ratio")?,
            registry,
        };

        for collector in exporter.collectors() {
            exporter.registry.register(collector)?;
        }
        Ok(exporter)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Overwrite every gauge with `report`
    pub fn publish(&self, report: &CacheReport) {
        self.max_size.set(report.max_size as i64);
        self.used_size.set(report.used_size as i64);
        self.entries_count.set(report.entries_count as i64);
        self.hits_rate.set(report.hits_rate);
        self.misses_rate.set(report.misses_rate);
        self.hits_throughput.set(report.hits_throughput);
        self.misses_throughput.set(report.misses_throughput);
        self.eviction_count.set(report.eviction_count as i64);
        self.inserted_entries.set(report.inserted_entries_count as i64);
        self.evicted_entries.set(report.evicted_entries_count as i64);
        self.hit_ratio.set(report.hit_ratio);

        debug!(
            used_size = report.used_size,
            hits_rate = report.hits_rate,
            "Published cache metrics"
        );
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    fn collectors(&self) -> Vec<Box<dyn prometheus::core::Collector>> {
        vec![
            Box::new(self.max_size.clone()),
            Box::new(self.used_size.clone()),
            Box::new(self.entries_count.clone()),
            Box::new(self.hits_rate.clone()),
            Box::new(self.misses_rate.clone()),
            Box::new(self.hits_throughput.clone()),
            Box::new(self.misses_throughput.clone()),
            Box::new(self.eviction_count.clone()),
            Box::new(self.inserted_entries.clone()),
            Box::new(self.evicted_entries.clone()),
            Box::new(self.hit_ratio.clone()),
        ]
    }
}

fn int_gauge(name: &str, help: &str) -> prometheus::Result<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))
}

fn gauge(name: &str, help: &str) -> prometheus::Result<Gauge> {
    Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))
}

impl std::fmt::Debug for CacheMetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheMetricsExporter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_render() {
        let exporter = CacheMetricsExporter::new().unwrap();
        exporter.publish(&CacheReport {
            max_size: 100,
            used_size: 70,
            entries_count: 10,
            hits_rate: 2.5,
            eviction_count: 3,
            ..Default::default()
        });

        let text = exporter.render().unwrap();
        assert!(text.contains("ledger_cache_max_size_bytes 100"));
        assert!(text.contains("ledger_cache_used_size_bytes 70"));
        assert!(text.contains("ledger_cache_hits_per_second 2.5"));
        assert!(text.contains("ledger_cache_eviction_passes 3"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        let _first = CacheMetricsExporter::with_registry(registry.clone()).unwrap();
        assert!(CacheMetricsExporter::with_registry(registry).is_err());
    }
}
