//! Per-Ledger Entry Cache
//!
//! Position-ordered store of the entries of one managed ledger. Every size
//! change is mirrored into the manager's aggregate under the cache lock, so
//! the aggregate never loses or double-counts a delta.
//!
//! # Design
//!
//! - `entries`: `Position -> Slot`, ordered for range invalidation
//! - `by_insertion`: insertion sequence -> `Position`, ordered for
//!   oldest-first and age-based eviction
//! - One `RwLock` per cache; lookups take the read lock, mutations the write
//!   lock. No lock spans more than one cache.

use std::collections::BTreeMap;
use std::ops::RangeBounds;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::entry::Entry;
use super::manager::ManagerShared;
use super::position::Position;
use super::read_through::{check_confirmed, fetch_range, fetch_runs, missing_runs};
use super::stats::CacheStats;
use crate::domain::ports::{LedgerContext, ReadHandle};
use crate::error::Result;

/// A cached entry plus the bookkeeping eviction needs
struct Slot {
    entry: Entry,
    sequence: u64,
    inserted_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: BTreeMap<Position, Slot>,
    by_insertion: BTreeMap<u64, Position>,
    closed: bool,
}

/// Entry considered by a size-triggered eviction pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EvictionCandidate {
    pub position: Position,
    pub sequence: u64,
    pub size: u64,
    /// Behind every active cursor of a ledger that asked for
    /// mark-deleted-aware eviction
    pub preferred: bool,
}

/// Entries and bytes removed by one operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Removed {
    pub entries: u64,
    pub bytes: u64,
}

impl Removed {
    pub(crate) fn merge(&mut self, other: Removed) {
        self.entries += other.entries;
        self.bytes += other.bytes;
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

/// Entry cache of one ledger, active implementation
pub struct LedgerEntryCache {
    ledger: Arc<dyn LedgerContext>,
    manager: Weak<ManagerShared>,
    stats: Arc<CacheStats>,
    state: RwLock<CacheState>,
    /// Sum of cached entry sizes, readable without the lock
    current_size: AtomicU64,
}

impl LedgerEntryCache {
    pub(crate) fn new(
        ledger: Arc<dyn LedgerContext>,
        manager: Weak<ManagerShared>,
        stats: Arc<CacheStats>,
    ) -> Self {
        Self {
            ledger,
            manager,
            stats,
            state: RwLock::new(CacheState::default()),
            current_size: AtomicU64::new(0),
        }
    }

    pub fn ledger_name(&self) -> &str {
        self.ledger.name()
    }

    pub(crate) fn ledger(&self) -> &Arc<dyn LedgerContext> {
        &self.ledger
    }

    /// Admit `entry` unless its position is already cached
    ///
    /// Returns `false` without touching the cache on a duplicate position,
    /// even if the payload differs, and after the cache has been removed.
    pub fn insert(&self, entry: Entry) -> bool {
        let Some(manager) = self.manager.upgrade() else {
            debug!(ledger = self.ledger_name(), position = %entry.position(), "Cache manager gone, entry not admitted");
            return false;
        };

        let position = entry.position();
        let size = entry.size();
        {
            let mut state = self.state.write();
            if state.closed {
                drop(state);
                warn!(ledger = self.ledger_name(), %position, "Entry cache removed, entry not admitted");
                return false;
            }
            if state.entries.contains_key(&position) {
                return false;
            }

            let sequence = manager.next_sequence();
            state.by_insertion.insert(sequence, position);
            state.entries.insert(
                position,
                Slot {
                    entry,
                    sequence,
                    inserted_at: Instant::now(),
                },
            );
            self.current_size.fetch_add(size, Ordering::Relaxed);
            manager.add_size(size);
        }

        self.stats.record_inserted();
        manager.check_budget();
        true
    }

    /// Cached entry at `position`, without touching hit/miss statistics
    pub fn get_entry(&self, position: Position) -> Option<Entry> {
        self.state.read().entries.get(&position).map(|s| s.entry.retain())
    }

    /// Whether `position` is cached
    pub fn contains(&self, position: Position) -> bool {
        self.state.read().entries.contains_key(&position)
    }

    /// Bytes currently cached for this ledger
    pub fn get_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    pub fn entries_count(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Remove every entry of `last_position`'s ledger up to and including it
    pub fn invalidate_entries(&self, last_position: Position) -> Removed {
        let first = Position::first_of(last_position.ledger_id());
        let removed = self.remove_range(first..=last_position);
        if !removed.is_empty() {
            debug!(
                ledger = self.ledger_name(),
                up_to = %last_position,
                entries = removed.entries,
                bytes = removed.bytes,
                "Invalidated entries"
            );
        }
        removed
    }

    /// Remove every entry belonging to `ledger_id`
    pub fn invalidate_all_entries(&self, ledger_id: u64) -> Removed {
        self.remove_range(Position::first_of(ledger_id)..=Position::last_of(ledger_id))
    }

    /// Remove every cached entry
    pub fn invalidate_all(&self) -> Removed {
        self.remove_range(..)
    }

    /// Empty the cache and refuse further admissions
    pub(crate) fn close(&self) -> Removed {
        self.state.write().closed = true;
        self.invalidate_all()
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Read one entry, falling back to storage on a miss
    pub async fn read_entry(&self, handle: &dyn ReadHandle, position: Position) -> Result<Entry> {
        if let Some(entry) = self.get_entry(position) {
            self.stats.record_hit(entry.size());
            return Ok(entry);
        }

        self.stats.record_miss();
        let entry_id = position.entry_id();
        let mut fetched = fetch_range(handle, entry_id, entry_id).await.map_err(|e| {
            warn!(ledger = self.ledger_name(), %position, error = %e, "Read-through failed");
            e
        })?;

        // fetch_range returns exactly one entry for a one-entry range
        let entry = fetched.remove(0);
        self.stats.record_miss_bytes(entry.size());
        self.admit_fetched(&entry);
        Ok(entry)
    }

    /// Read `first..=last` of the handle's ledger in position order
    ///
    /// Cached positions count as hits and are never re-read; each
    /// contiguous run of missing positions is one storage read. A range
    /// reaching past the last confirmed entry fails as a missing entry.
    pub async fn read_entries(&self, handle: &dyn ReadHandle, first: u64, last: u64) -> Result<Vec<Entry>> {
        if last < first {
            return Ok(Vec::new());
        }
        check_confirmed(handle, first, last)?;

        let mut found = self.lookup_range(handle.ledger_id(), first, last);
        let hit_bytes: u64 = found.values().map(|e| e.size()).sum();
        self.stats.record_hits(found.len() as u64, hit_bytes);

        let runs = missing_runs(found.keys().copied(), first, last);
        if runs.is_empty() {
            return Ok(found.into_values().collect());
        }

        let missing: u64 = runs.iter().map(|(a, b)| b - a + 1).sum();
        self.stats.record_misses(missing);

        let fetched = fetch_runs(handle, &runs).await.map_err(|e| {
            warn!(ledger = self.ledger_name(), first, last, error = %e, "Read-through failed");
            e
        })?;

        for entry in fetched.into_iter().flatten() {
            self.stats.record_miss_bytes(entry.size());
            self.admit_fetched(&entry);
            found.insert(entry.entry_id(), entry);
        }

        Ok(found.into_values().collect())
    }

    fn admit_fetched(&self, entry: &Entry) {
        if !self.insert(entry.retain()) {
            debug!(ledger = self.ledger_name(), position = %entry.position(), "Fetched entry not admitted");
        }
    }

    /// Cached entries of `first..=last`, keyed by entry id
    fn lookup_range(&self, ledger_id: u64, first: u64, last: u64) -> BTreeMap<u64, Entry> {
        let state = self.state.read();
        let found = state
            .entries
            .range(Position::new(ledger_id, first)..=Position::new(ledger_id, last))
            .map(|(position, slot)| (position.entry_id(), slot.entry.retain()))
            .collect();
        found
    }

    // =========================================================================
    // Eviction primitives
    // =========================================================================

    /// Oldest entries whose sizes add up to at least `budget` bytes, plus the
    /// oldest preferred entries up to the same budget
    pub(crate) fn eviction_candidates(&self, budget: u64) -> Vec<EvictionCandidate> {
        let boundary = if self.ledger.config().cache_eviction_by_mark_deleted_position {
            // No active cursor: nothing will read these entries again
            Some(self.ledger.slowest_reader_position().unwrap_or(Position::last_of(u64::MAX)))
        } else {
            None
        };

        let state = self.state.read();
        let mut candidates = Vec::new();

        let candidate = |position: Position, slot: &Slot| EvictionCandidate {
            position,
            sequence: slot.sequence,
            size: slot.entry.size(),
            preferred: boundary.is_some_and(|b| position <= b),
        };

        let mut taken = 0u64;
        for position in state.by_insertion.values() {
            if taken >= budget {
                break;
            }
            if let Some(slot) = state.entries.get(position) {
                taken += slot.entry.size();
                candidates.push(candidate(*position, slot));
            }
        }

        if let Some(boundary) = boundary {
            let mut preferred: Vec<EvictionCandidate> = state
                .entries
                .range(..=boundary)
                .map(|(p, s)| candidate(*p, s))
                .collect();
            preferred.sort_unstable_by_key(|c| c.sequence);

            let mut taken = 0u64;
            for c in preferred {
                if taken >= budget {
                    break;
                }
                taken += c.size;
                if !candidates.iter().any(|x| x.sequence == c.sequence) {
                    candidates.push(c);
                }
            }
        }

        candidates
    }

    /// Evict one entry if it is still the instance the candidate describes
    pub(crate) fn evict_entry(&self, candidate: &EvictionCandidate) -> Option<u64> {
        let manager = self.manager.upgrade();
        let mut state = self.state.write();
        match state.entries.get(&candidate.position) {
            Some(slot) if slot.sequence == candidate.sequence => {}
            _ => return None,
        }
        let slot = Self::take(&mut state, &candidate.position)?;
        let size = slot.entry.size();
        self.current_size.fetch_sub(size, Ordering::Relaxed);
        if let Some(manager) = &manager {
            manager.sub_size(size);
        }
        drop(state);

        self.stats.record_evicted(1);
        Some(size)
    }

    /// Evict every entry at or before `position`, earlier ledgers included
    pub(crate) fn evict_consumed(&self, position: Position) -> Removed {
        self.remove_range(..=position)
    }

    /// Evict every entry inserted before `cutoff`
    pub(crate) fn evict_older_than(&self, cutoff: Instant) -> Removed {
        let manager = self.manager.upgrade();
        let mut removed = Removed::default();
        {
            let mut state = self.state.write();
            loop {
                // by_insertion order is also insertion-time order
                let Some((_, position)) = state.by_insertion.first_key_value() else {
                    break;
                };
                let position = *position;
                let expired = state
                    .entries
                    .get(&position)
                    .is_some_and(|slot| slot.inserted_at < cutoff);
                if !expired {
                    break;
                }
                if let Some(slot) = Self::take(&mut state, &position) {
                    removed.entries += 1;
                    removed.bytes += slot.entry.size();
                }
            }

            self.current_size.fetch_sub(removed.bytes, Ordering::Relaxed);
            if let Some(manager) = &manager {
                manager.sub_size(removed.bytes);
            }
        }

        self.stats.record_evicted(removed.entries);
        removed
    }

    fn remove_range<R: RangeBounds<Position>>(&self, range: R) -> Removed {
        let manager = self.manager.upgrade();
        let mut removed = Removed::default();
        {
            let mut state = self.state.write();
            let positions: Vec<Position> = state.entries.range(range).map(|(p, _)| *p).collect();
            for position in positions {
                if let Some(slot) = Self::take(&mut state, &position) {
                    removed.entries += 1;
                    removed.bytes += slot.entry.size();
                }
            }

            self.current_size.fetch_sub(removed.bytes, Ordering::Relaxed);
            if let Some(manager) = &manager {
                manager.sub_size(removed.bytes);
            }
        }

        self.stats.record_evicted(removed.entries);
        removed
    }

    fn take(state: &mut CacheState, position: &Position) -> Option<Slot> {
        let slot = state.entries.remove(position)?;
        state.by_insertion.remove(&slot.sequence);
        Some(slot)
    }
}

impl std::fmt::Debug for LedgerEntryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerEntryCache")
            .field("ledger", &self.ledger_name())
            .field("size", &self.get_size())
            .field("entries", &self.entries_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryLedgerStore, StaticLedgerContext};
    use crate::cache::{EntryCache, EntryCacheManager};
    use crate::config::{CacheManagerConfig, LedgerConfig};
    use crate::error::{Error, StorageError};
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn manager() -> EntryCacheManager {
        EntryCacheManager::new(
            CacheManagerConfig::new(1_000).with_eviction_time_threshold(Duration::from_secs(60)),
        )
        .unwrap()
    }

    fn active(manager: &EntryCacheManager, ledger: StaticLedgerContext) -> Arc<LedgerEntryCache> {
        match manager.get_entry_cache(Arc::new(ledger)).unwrap() {
            EntryCache::Active(cache) => cache,
            EntryCache::Disabled(_) => panic!("expected an active cache"),
        }
    }

    fn store_with(ledger_id: u64, sizes: &[usize]) -> Arc<InMemoryLedgerStore> {
        let store = Arc::new(InMemoryLedgerStore::new());
        for (i, size) in sizes.iter().enumerate() {
            store.append(ledger_id, vec![i as u8; *size]);
        }
        store
    }

    #[tokio::test]
    async fn test_duplicate_insert_keeps_first() {
        let manager = manager();
        let cache = active(&manager, StaticLedgerContext::new("ml"));

        assert!(cache.insert(Entry::create(1, 0, &[1u8; 4])));
        assert!(!cache.insert(Entry::create(1, 0, &[2u8; 6])));

        assert_eq!(cache.get_size(), 4);
        assert_eq!(manager.size(), 4);
        let cached = cache.get_entry(Position::new(1, 0)).unwrap();
        assert_eq!(cached.data().as_ref(), &[1u8; 4]);
    }

    #[tokio::test]
    async fn test_invalidate_entries_is_inclusive_prefix() {
        let manager = manager();
        let cache = active(&manager, StaticLedgerContext::new("ml"));
        for i in 0..5 {
            cache.insert(Entry::create(1, i, &[0u8; 2]));
        }
        cache.insert(Entry::create(2, 0, &[0u8; 3]));

        let removed = cache.invalidate_entries(Position::new(1, 2));
        assert_eq!(removed, Removed { entries: 3, bytes: 6 });
        assert!(!cache.contains(Position::new(1, 2)));
        assert!(cache.contains(Position::new(1, 3)));
        assert!(cache.contains(Position::new(2, 0)));
        assert_eq!(manager.size(), 7);
        assert_eq!(manager.stats().evicted_entries(), 3);
    }

    #[tokio::test]
    async fn test_invalidate_all_entries_of_one_ledger() {
        let manager = manager();
        let cache = active(&manager, StaticLedgerContext::new("ml"));
        cache.insert(Entry::create(1, 0, &[0u8; 2]));
        cache.insert(Entry::create(1, 9, &[0u8; 2]));
        cache.insert(Entry::create(2, 0, &[0u8; 3]));

        assert_eq!(cache.invalidate_all_entries(1).entries, 2);
        assert_eq!(cache.get_size(), 3);

        assert_eq!(cache.invalidate_all().entries, 1);
        assert_eq!(manager.size(), 0);
    }

    #[tokio::test]
    async fn test_read_entry_miss_then_hit() {
        let manager = manager();
        let cache = active(&manager, StaticLedgerContext::new("ml"));
        let store = store_with(1, &[5, 6]);
        let handle = store.open(1);

        let entry = cache.read_entry(&*handle, Position::new(1, 1)).await.unwrap();
        assert_eq!(entry.size(), 6);
        assert_eq!(manager.stats().misses(), 1);
        assert_eq!(manager.stats().miss_bytes(), 6);

        cache.read_entry(&*handle, Position::new(1, 1)).await.unwrap();
        assert_eq!(manager.stats().hits(), 1);
        assert_eq!(manager.stats().hit_bytes(), 6);
        assert_eq!(store.stats().read_calls, 1);
    }

    #[tokio::test]
    async fn test_read_entries_fetches_only_gaps() {
        let manager = manager();
        let cache = active(&manager, StaticLedgerContext::new("ml"));
        let store = store_with(1, &[1; 8]);
        let handle = store.open(1);

        cache.insert(Entry::create(1, 2, &[0u8; 1]));
        cache.insert(Entry::create(1, 5, &[0u8; 1]));

        let entries = cache.read_entries(&*handle, 0, 7).await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.entry_id()).collect();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());

        // Gaps: 0..=1, 3..=4, 6..=7
        assert_eq!(store.stats().read_calls, 3);
        assert_eq!(store.stats().entries_read, 6);
        assert_eq!(manager.stats().hits(), 2);
        assert_eq!(manager.stats().misses(), 6);
        assert_eq!(cache.entries_count(), 8);
    }

    #[tokio::test]
    async fn test_failed_read_leaves_cache_untouched() {
        let manager = manager();
        let cache = active(&manager, StaticLedgerContext::new("ml"));
        let store = store_with(1, &[1; 4]);
        store.fail_reads(1, StorageError::Io("disk gone".to_string()));
        cache.insert(Entry::create(1, 0, &[0u8; 1]));

        let result = cache.read_entries(&*store.open(1), 0, 3).await;
        assert_matches!(
            result,
            Err(Error::DurableRead {
                ledger_id: 1,
                source: StorageError::Io(_),
                ..
            })
        );
        assert_eq!(cache.entries_count(), 1);
        assert_eq!(manager.size(), 1);
    }

    #[tokio::test]
    async fn test_read_past_last_confirmed_is_missing_entry() {
        let manager = manager();
        let cache = active(&manager, StaticLedgerContext::new("ml"));
        let store = store_with(1, &[1; 4]);
        cache.insert(Entry::create(1, 0, &[0u8; 1]));

        for last in [4, 1 << 32, u64::MAX] {
            let result = cache.read_entries(&*store.open(1), 0, last).await;
            assert_matches!(
                result.as_ref().map_err(|e| e.storage_error()),
                Err(Some(StorageError::NoSuchEntry { ledger_id: 1, entry_id: 4 }))
            );
        }

        assert_eq!(store.stats().read_calls, 0);
        assert_eq!(manager.stats().hits(), 0);
        assert_eq!(manager.stats().misses(), 0);
        assert_eq!(cache.entries_count(), 1);
    }

    #[tokio::test]
    async fn test_read_at_end_of_ledger() {
        let manager = manager();
        let cache = active(&manager, StaticLedgerContext::new("ml"));
        let store = store_with(1, &[1; 4]);
        cache.insert(Entry::create(1, 3, &[0u8; 1]));

        let entries = cache.read_entries(&*store.open(1), 2, 3).await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.entry_id()).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(manager.stats().hits(), 1);
        assert_eq!(manager.stats().misses(), 1);
    }

    #[tokio::test]
    async fn test_candidates_cover_budget_oldest_first() {
        let manager = manager();
        let cache = active(&manager, StaticLedgerContext::new("ml"));
        for i in (0..6).rev() {
            cache.insert(Entry::create(1, i, &[0u8; 10]));
        }

        let candidates = cache.eviction_candidates(25);
        let positions: Vec<_> = candidates.iter().map(|c| c.position.entry_id()).collect();
        assert_eq!(positions, vec![5, 4, 3]);
        assert!(candidates.iter().all(|c| !c.preferred));
    }

    #[tokio::test]
    async fn test_candidates_prefer_consumed_entries() {
        let manager = manager();
        let ctx = StaticLedgerContext::with_config(
            "ml",
            LedgerConfig::default().with_eviction_by_mark_deleted_position(true),
        );
        ctx.set_slowest_reader_position(Some(Position::new(1, 1)));
        let cache = active(&manager, ctx);
        for i in (0..4).rev() {
            cache.insert(Entry::create(1, i, &[0u8; 10]));
        }

        let preferred: Vec<_> = cache
            .eviction_candidates(10)
            .into_iter()
            .filter(|c| c.preferred)
            .map(|c| c.position.entry_id())
            .collect();
        assert_eq!(preferred, vec![1]);
    }

    #[tokio::test]
    async fn test_evict_ignores_stale_candidate() {
        let manager = manager();
        let cache = active(&manager, StaticLedgerContext::new("ml"));
        cache.insert(Entry::create(1, 0, &[0u8; 10]));
        let candidate = cache.eviction_candidates(10)[0];

        cache.invalidate_all();
        cache.insert(Entry::create(1, 0, &[0u8; 10]));

        assert_eq!(cache.evict_entry(&candidate), None);
        assert!(cache.contains(Position::new(1, 0)));

        let fresh = cache.eviction_candidates(10)[0];
        assert_eq!(cache.evict_entry(&fresh), Some(10));
        assert_eq!(manager.size(), 0);
    }

    #[tokio::test]
    async fn test_evict_older_than() {
        let manager = manager();
        let cache = active(&manager, StaticLedgerContext::new("ml"));
        cache.insert(Entry::create(1, 0, &[0u8; 3]));
        cache.insert(Entry::create(1, 1, &[0u8; 3]));
        std::thread::sleep(Duration::from_millis(2));
        let cutoff = Instant::now();
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(Entry::create(1, 2, &[0u8; 3]));

        let removed = cache.evict_older_than(cutoff);
        assert_eq!(removed, Removed { entries: 2, bytes: 6 });
        assert!(cache.contains(Position::new(1, 2)));
        assert_eq!(manager.size(), 3);
    }

    #[tokio::test]
    async fn test_closed_cache_rejects_inserts() {
        let manager = manager();
        let cache = active(&manager, StaticLedgerContext::new("ml"));
        cache.insert(Entry::create(1, 0, &[0u8; 3]));

        manager.remove_entry_cache("ml");
        assert!(cache.is_closed());
        assert!(!cache.insert(Entry::create(1, 1, &[0u8; 3])));
        assert_eq!(manager.size(), 0);
    }
}
