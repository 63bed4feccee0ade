//! Entry Cache Manager
//!
//! Process-wide coordinator of the per-ledger entry caches. Owns the byte
//! budget, the aggregate size across every ledger cache, the shared
//! statistics and the background eviction task.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    EntryCacheManager                        │
//! │   budget: max size, watermark, time threshold               │
//! │   aggregate size ◄──── every insert / removal (atomic)      │
//! ├────────────────────────────────────────────────────────────┤
//! │  ledger-a cache │  ledger-b cache │  ...  (DashMap by name) │
//! ├────────────────────────────────────────────────────────────┤
//! │  evictor task: size pass on breach; consumed and expired    │
//! │  entries dropped on each tick                               │
//! └────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::disabled::DisabledEntryCache;
use super::entry_cache::EntryCache;
use super::eviction::{order_victims, run_evictor, EvictionScheduler, PassState};
use super::ledger_cache::{LedgerEntryCache, Removed};
use super::stats::{CacheGauges, CacheReport, CacheStats, StatsWindow};
use crate::config::{eviction_target, validate_watermark, CacheManagerConfig};
use crate::domain::ports::LedgerContext;
use crate::error::{Error, Result};

/// Aggregate cached bytes across every ledger cache
///
/// Only ever moved by deltas, so it can never be overwritten by a stale
/// reading.
#[derive(Debug, Default)]
pub(crate) struct SizeAccumulator(AtomicI64);

impl SizeAccumulator {
    pub fn add(&self, bytes: u64) {
        self.0.fetch_add(bytes as i64, Ordering::AcqRel);
    }

    pub fn sub(&self, bytes: u64) {
        self.0.fetch_sub(bytes as i64, Ordering::AcqRel);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire).max(0) as u64
    }
}

/// State shared between the manager handle, its caches and the evictor
pub(crate) struct ManagerShared {
    max_size: AtomicU64,
    watermark_bits: AtomicU64,
    time_threshold: Duration,
    eviction_interval: Duration,
    enabled: bool,

    caches: DashMap<String, EntryCache>,
    size: SizeAccumulator,

    stats: Arc<CacheStats>,
    window: StatsWindow,

    sequence: AtomicU64,
    scheduler: EvictionScheduler,
    shut_down: AtomicBool,
}

impl ManagerShared {
    fn new(config: &CacheManagerConfig) -> Self {
        Self {
            max_size: AtomicU64::new(config.max_cache_size),
            watermark_bits: AtomicU64::new(config.cache_eviction_watermark.to_bits()),
            time_threshold: config.cache_eviction_time_threshold,
            eviction_interval: config.cache_eviction_interval,
            enabled: config.is_enabled(),
            caches: DashMap::new(),
            size: SizeAccumulator::default(),
            stats: Arc::new(CacheStats::new()),
            window: StatsWindow::new(),
            sequence: AtomicU64::new(0),
            scheduler: EvictionScheduler::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Hooks used by the ledger caches
    // =========================================================================

    /// Next global insertion sequence number
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add_size(&self, bytes: u64) {
        self.size.add(bytes);
    }

    pub fn sub_size(&self, bytes: u64) {
        self.size.sub(bytes);
    }

    /// Schedule a size-triggered pass if the aggregate exceeds the budget
    pub fn check_budget(&self) {
        if self.over_budget() && !self.shut_down.load(Ordering::Acquire) {
            self.scheduler.request();
        }
    }

    // =========================================================================
    // Budget
    // =========================================================================

    pub fn size(&self) -> u64 {
        self.size.get()
    }

    pub fn max_size(&self) -> u64 {
        self.max_size.load(Ordering::Acquire)
    }

    pub fn watermark(&self) -> f64 {
        f64::from_bits(self.watermark_bits.load(Ordering::Acquire))
    }

    pub fn eviction_target(&self) -> u64 {
        eviction_target(self.max_size(), self.watermark())
    }

    /// Aggregate above the max size
    pub fn over_budget(&self) -> bool {
        self.size() > self.max_size()
    }

    pub fn eviction_interval(&self) -> Duration {
        self.eviction_interval
    }

    pub fn scheduler(&self) -> &EvictionScheduler {
        &self.scheduler
    }

    fn active_caches(&self) -> Vec<Arc<LedgerEntryCache>> {
        self.caches
            .iter()
            .filter_map(|c| match c.value() {
                EntryCache::Active(cache) => Some(cache.clone()),
                EntryCache::Disabled(_) => None,
            })
            .collect()
    }

    fn entries_count(&self) -> u64 {
        self.caches.iter().map(|c| c.entries_count() as u64).sum()
    }

    // =========================================================================
    // Eviction passes
    // =========================================================================

    /// Bring the aggregate down to the eviction target, oldest insertion
    /// first, entries behind every active cursor ahead of the rest
    #[instrument(level = "debug", skip(self))]
    pub fn evict_to_watermark(&self) {
        let size = self.size();
        if size <= self.max_size() {
            return;
        }

        let target = self.eviction_target();
        let needed = size.saturating_sub(target);
        let caches = self.active_caches();

        let mut victims: Vec<_> = caches
            .iter()
            .enumerate()
            .flat_map(|(i, cache)| {
                cache
                    .eviction_candidates(needed)
                    .into_iter()
                    .map(move |c| (i, c))
            })
            .collect();
        order_victims(&mut victims);

        let mut removed = Removed::default();
        for (i, candidate) in &victims {
            if self.size() <= target {
                break;
            }
            if let Some(bytes) = caches[*i].evict_entry(candidate) {
                removed.merge(Removed { entries: 1, bytes });
            }
        }

        self.stats.record_eviction_pass();
        debug!(
            before = size,
            after = self.size(),
            target,
            entries = removed.entries,
            bytes = removed.bytes,
            "Size-triggered eviction pass"
        );
    }

    /// Drop every entry the slowest active cursor has already consumed
    pub fn evict_consumed(&self) {
        let mut removed = Removed::default();
        for cache in self.active_caches() {
            if let Some(position) = cache.ledger().slowest_reader_position() {
                removed.merge(cache.evict_consumed(position));
            }
        }

        if !removed.is_empty() {
            debug!(
                entries = removed.entries,
                bytes = removed.bytes,
                "Evicted entries behind the slowest reader"
            );
        }
    }

    /// Drop every entry older than the time threshold
    pub fn evict_expired(&self) {
        let Some(cutoff) = Instant::now().checked_sub(self.time_threshold) else {
            return;
        };

        let mut removed = Removed::default();
        for cache in self.active_caches() {
            removed.merge(cache.evict_older_than(cutoff));
        }

        if !removed.is_empty() {
            debug!(
                entries = removed.entries,
                bytes = removed.bytes,
                threshold = ?self.time_threshold,
                "Evicted expired entries"
            );
        }
    }
}

/// Process-wide entry cache coordinator
///
/// Must be created inside a Tokio runtime; the background evictor runs on
/// it until [`shutdown`](Self::shutdown) or drop.
pub struct EntryCacheManager {
    shared: Arc<ManagerShared>,
    cancel: CancellationToken,
    evictor: Mutex<Option<JoinHandle<()>>>,
}

impl EntryCacheManager {
    /// Create a manager and start its evictor
    pub fn new(config: CacheManagerConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(ManagerShared::new(&config));
        let cancel = CancellationToken::new();

        let evictor = if shared.enabled {
            Some(tokio::spawn(run_evictor(shared.clone(), cancel.clone())))
        } else {
            None
        };

        info!(
            max_size = config.max_cache_size,
            watermark = config.cache_eviction_watermark,
            interval = ?config.cache_eviction_interval,
            time_threshold = ?config.cache_eviction_time_threshold,
            enabled = shared.enabled,
            "Entry cache manager started"
        );

        Ok(Self {
            shared,
            cancel,
            evictor: Mutex::new(evictor),
        })
    }

    /// The cache of `ledger`, created on first request
    ///
    /// Concurrent callers for the same ledger name all receive the same
    /// cache. When the budget is zero every ledger gets a disabled cache.
    pub fn get_entry_cache(&self, ledger: Arc<dyn LedgerContext>) -> Result<EntryCache> {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(Error::ManagerShutdown);
        }

        let shared = &self.shared;
        let cache = shared
            .caches
            .entry(ledger.name().to_string())
            .or_insert_with(|| {
                debug!(ledger = ledger.name(), enabled = shared.enabled, "Creating entry cache");
                if shared.enabled {
                    EntryCache::Active(Arc::new(LedgerEntryCache::new(
                        ledger.clone(),
                        Arc::downgrade(shared),
                        shared.stats.clone(),
                    )))
                } else {
                    EntryCache::Disabled(Arc::new(DisabledEntryCache::new(
                        ledger.clone(),
                        shared.stats.clone(),
                    )))
                }
            })
            .clone();

        Ok(cache)
    }

    /// Drop the cache of `name`, releasing every entry it holds
    ///
    /// Unknown names are ignored. Handles to the removed cache stay valid
    /// but refuse new entries.
    pub fn remove_entry_cache(&self, name: &str) {
        let Some((_, cache)) = self.shared.caches.remove(name) else {
            return;
        };

        let removed = cache.close();
        info!(
            ledger = name,
            entries = removed.entries,
            bytes = removed.bytes,
            "Removed entry cache"
        );
    }

    /// Aggregate cached bytes across all ledger caches
    pub fn size(&self) -> u64 {
        self.shared.size()
    }

    pub fn max_size(&self) -> u64 {
        self.shared.max_size()
    }

    pub fn eviction_watermark(&self) -> f64 {
        self.shared.watermark()
    }

    /// Size a size-triggered pass brings the aggregate down to
    pub fn eviction_target(&self) -> u64 {
        self.shared.eviction_target()
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled
    }

    pub fn cache_count(&self) -> usize {
        self.shared.caches.len()
    }

    /// Entries held across all ledger caches
    pub fn entries_count(&self) -> u64 {
        self.shared.entries_count()
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.shared.caches.iter().map(|c| c.key().clone()).collect()
    }

    pub fn eviction_state(&self) -> PassState {
        self.shared.scheduler.state()
    }

    /// Resolve once no eviction pass is scheduled or running
    pub async fn wait_for_pending_cache_evictions(&self) {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return;
        }
        self.shared.scheduler.wait_idle().await;
    }

    /// Change the budget and watermark at runtime
    ///
    /// Switching between a zero and a non-zero budget is refused; the
    /// cache kind is fixed per ledger when the manager is created.
    pub fn update_cache_size_and_threshold(&self, max_size: u64, watermark: f64) -> Result<()> {
        validate_watermark(watermark)?;
        if (max_size > 0) != self.shared.enabled {
            return Err(Error::InvalidConfig(format!(
                "cannot switch cache between enabled and disabled at runtime (max size {})",
                max_size
            )));
        }

        self.shared.max_size.store(max_size, Ordering::Release);
        self.shared
            .watermark_bits
            .store(watermark.to_bits(), Ordering::Release);

        info!(max_size, watermark, "Updated entry cache budget");
        self.shared.check_budget();
        Ok(())
    }

    /// Close the current stats window, treating it as `period` long
    pub fn refresh_stats(&self, period: Duration) -> CacheReport {
        self.shared
            .window
            .refresh(&self.shared.stats, self.gauges(), period)
    }

    /// Close the current stats window using wall-clock time
    pub fn refresh_stats_now(&self) -> CacheReport {
        self.shared.window.refresh_now(&self.shared.stats, self.gauges())
    }

    /// Report from the most recent refresh
    pub fn last_report(&self) -> CacheReport {
        self.shared.window.last_report()
    }

    /// Cumulative counters
    pub fn stats(&self) -> &CacheStats {
        &self.shared.stats
    }

    fn gauges(&self) -> CacheGauges {
        CacheGauges {
            max_size: self.max_size(),
            used_size: self.size(),
            entries_count: self.entries_count(),
        }
    }

    /// Stop the evictor and release every cached entry
    ///
    /// Idempotent; later `get_entry_cache` calls fail.
    pub async fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.cancel.cancel();
        let evictor = self.evictor.lock().take();
        if let Some(handle) = evictor {
            if let Err(e) = handle.await {
                debug!(error = %e, "Evictor task ended abnormally");
            }
        }

        let names = self.cache_names();
        for name in &names {
            self.remove_entry_cache(name);
        }

        info!(caches = names.len(), "Entry cache manager shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for EntryCacheManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for EntryCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryCacheManager")
            .field("size", &self.size())
            .field("max_size", &self.max_size())
            .field("caches", &self.cache_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
