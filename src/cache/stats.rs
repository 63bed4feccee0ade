//! Cache Statistics
//!
//! Cumulative lock-free counters plus windowed rates computed between
//! successive refresh calls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Cumulative cache counters
#[derive(Debug, Default)]
pub struct CacheStats {
    inserted_entries: AtomicU64,
    evicted_entries: AtomicU64,
    hits: AtomicU64,
    hit_bytes: AtomicU64,
    misses: AtomicU64,
    miss_bytes: AtomicU64,
    eviction_passes: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_inserted(&self) {
        self.inserted_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, entries: u64) {
        if entries > 0 {
            self.evicted_entries.fetch_add(entries, Ordering::Relaxed);
        }
    }

    pub fn record_hit(&self, bytes: u64) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.hit_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_hits(&self, count: u64, bytes: u64) {
        self.hits.fetch_add(count, Ordering::Relaxed);
        self.hit_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_misses(&self, count: u64) {
        self.misses.fetch_add(count, Ordering::Relaxed);
    }

    /// Bytes fetched from storage on behalf of a miss
    pub fn record_miss_bytes(&self, bytes: u64) {
        self.miss_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_eviction_pass(&self) {
        self.eviction_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inserted_entries(&self) -> u64 {
        self.inserted_entries.load(Ordering::Relaxed)
    }

    pub fn evicted_entries(&self) -> u64 {
        self.evicted_entries.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn hit_bytes(&self) -> u64 {
        self.hit_bytes.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn miss_bytes(&self) -> u64 {
        self.miss_bytes.load(Ordering::Relaxed)
    }

    pub fn eviction_passes(&self) -> u64 {
        self.eviction_passes.load(Ordering::Relaxed)
    }

    /// Lifetime hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    fn counters(&self) -> Counters {
        Counters {
            hits: self.hits(),
            hit_bytes: self.hit_bytes(),
            misses: self.misses(),
            miss_bytes: self.miss_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    hits: u64,
    hit_bytes: u64,
    misses: u64,
    miss_bytes: u64,
}

/// Live gauges read from the manager at refresh time
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheGauges {
    pub max_size: u64,
    pub used_size: u64,
    pub entries_count: u64,
}

/// Point-in-time cache report intended for periodic publication
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheReport {
    pub max_size: u64,
    pub used_size: u64,
    pub entries_count: u64,
    /// Hits per second over the last window
    pub hits_rate: f64,
    /// Misses per second over the last window
    pub misses_rate: f64,
    /// Bytes served from cache per second over the last window
    pub hits_throughput: f64,
    /// Bytes read from storage per second over the last window
    pub misses_throughput: f64,
    pub eviction_count: u64,
    pub inserted_entries_count: u64,
    pub evicted_entries_count: u64,
    pub hit_ratio: f64,
}

struct WindowState {
    previous: Counters,
    last_refresh: Instant,
    report: CacheReport,
}

/// Computes windowed rates between successive refreshes
pub struct StatsWindow {
    state: Mutex<WindowState>,
}

impl Default for StatsWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsWindow {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WindowState {
                previous: Counters::default(),
                last_refresh: Instant::now(),
                report: CacheReport::default(),
            }),
        }
    }

    /// Close the current window, treating it as `period` long
    pub fn refresh(&self, stats: &CacheStats, gauges: CacheGauges, period: Duration) -> CacheReport {
        let mut state = self.state.lock();
        state.last_refresh = Instant::now();
        Self::close_window(&mut state, stats, gauges, period)
    }

    /// Close the current window using the wall-clock time since the last refresh
    pub fn refresh_now(&self, stats: &CacheStats, gauges: CacheGauges) -> CacheReport {
        let mut state = self.state.lock();
        let now = Instant::now();
        let period = now.saturating_duration_since(state.last_refresh);
        state.last_refresh = now;
        Self::close_window(&mut state, stats, gauges, period)
    }

    /// Report computed by the most recent refresh
    pub fn last_report(&self) -> CacheReport {
        self.state.lock().report.clone()
    }

    fn close_window(
        state: &mut WindowState,
        stats: &CacheStats,
        gauges: CacheGauges,
        period: Duration,
    ) -> CacheReport {
        let current = stats.counters();
        let previous = std::mem::replace(&mut state.previous, current);
        let seconds = period.as_secs_f64();

        let rate = |now: u64, before: u64| {
            if seconds > 0.0 {
                now.saturating_sub(before) as f64 / seconds
            } else {
                0.0
            }
        };

        let report = CacheReport {
            max_size: gauges.max_size,
            used_size: gauges.used_size,
            entries_count: gauges.entries_count,
            hits_rate: rate(current.hits, previous.hits),
            misses_rate: rate(current.misses, previous.misses),
            hits_throughput: rate(current.hit_bytes, previous.hit_bytes),
            misses_throughput: rate(current.miss_bytes, previous.miss_bytes),
            eviction_count: stats.eviction_passes(),
            inserted_entries_count: stats.inserted_entries(),
            evicted_entries_count: stats.evicted_entries(),
            hit_ratio: stats.hit_ratio(),
        };
        state.report = report.clone();
        report
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn gauges() -> CacheGauges {
        CacheGauges {
            max_size: 100,
            used_size: 70,
            entries_count: 10,
        }
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = CacheStats::new();
        stats.record_inserted();
        stats.record_inserted();
        stats.record_evicted(3);
        stats.record_evicted(0);
        stats.record_hit(7);
        stats.record_hits(2, 14);
        stats.record_miss();
        stats.record_eviction_pass();

        assert_eq!(stats.inserted_entries(), 2);
        assert_eq!(stats.evicted_entries(), 3);
        assert_eq!(stats.hits(), 3);
        assert_eq!(stats.hit_bytes(), 21);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.eviction_passes(), 1);
        assert!((stats.hit_ratio() - 0.75).abs() < 0.001);
    }

    #[test]
    fn test_rates_are_zero_before_activity() {
        let stats = CacheStats::new();
        let window = StatsWindow::new();

        let report = window.refresh(&stats, gauges(), Duration::from_secs(1));
        assert_eq!(report.hits_rate, 0.0);
        assert_eq!(report.misses_rate, 0.0);
        assert_eq!(report.hits_throughput, 0.0);
        assert_eq!(report.used_size, 70);
        assert_eq!(report.max_size, 100);
    }

    #[test]
    fn test_rates_cover_only_the_last_window() {
        let stats = CacheStats::new();
        let window = StatsWindow::new();

        stats.record_hits(10, 70);
        let report = window.refresh(&stats, gauges(), Duration::from_secs(1));
        assert_eq!(report.hits_rate, 10.0);
        assert_eq!(report.hits_throughput, 70.0);

        // No activity in the next window
        let report = window.refresh(&stats, gauges(), Duration::from_secs(1));
        assert_eq!(report.hits_rate, 0.0);
        assert_eq!(report.hits_throughput, 0.0);

        stats.record_misses(4);
        stats.record_miss_bytes(40);
        let report = window.refresh(&stats, gauges(), Duration::from_secs(2));
        assert_eq!(report.misses_rate, 2.0);
        assert_eq!(report.misses_throughput, 20.0);
        assert_eq!(window.last_report(), report);
    }

    #[test]
    fn test_zero_period_yields_zero_rates() {
        let stats = CacheStats::new();
        let window = StatsWindow::new();

        stats.record_hits(5, 50);
        let report = window.refresh(&stats, gauges(), Duration::ZERO);
        assert_eq!(report.hits_rate, 0.0);
        // The window was still consumed
        let report = window.refresh(&stats, gauges(), Duration::from_secs(1));
        assert_eq!(report.hits_rate, 0.0);
    }

    #[test]
    fn test_refresh_now_measures_elapsed() {
        let stats = CacheStats::new();
        let window = StatsWindow::new();

        std::thread::sleep(Duration::from_millis(10));
        stats.record_hits(1, 1);
        let report = window.refresh_now(&stats, gauges());
        assert!(report.hits_rate > 0.0);
        assert!(report.hits_rate <= 100.0);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = CacheReport {
            hits_rate: 1.5,
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["hitsRate"], 1.5);
        assert!(json.get("evictedEntriesCount").is_some());
    }
}
