//! Disabled Entry Cache
//!
//! Stand-in used for every ledger when the cache budget is zero. Same
//! contract as [`LedgerEntryCache`](super::LedgerEntryCache), zero
//! retention: reads always go to storage.

use std::sync::Arc;

use super::entry::Entry;
use super::ledger_cache::Removed;
use super::position::Position;
use super::read_through::{check_confirmed, fetch_range};
use super::stats::CacheStats;
use crate::domain::ports::{LedgerContext, ReadHandle};
use crate::error::Result;

/// No-op entry cache
pub struct DisabledEntryCache {
    ledger: Arc<dyn LedgerContext>,
    stats: Arc<CacheStats>,
}

impl DisabledEntryCache {
    pub(crate) fn new(ledger: Arc<dyn LedgerContext>, stats: Arc<CacheStats>) -> Self {
        Self { ledger, stats }
    }

    pub fn ledger_name(&self) -> &str {
        self.ledger.name()
    }

    pub(crate) fn ledger(&self) -> &Arc<dyn LedgerContext> {
        &self.ledger
    }

    /// Accepts and drops the entry
    pub fn insert(&self, entry: Entry) -> bool {
        entry.release();
        true
    }

    pub fn get_size(&self) -> u64 {
        0
    }

    pub async fn read_entry(&self, handle: &dyn ReadHandle, position: Position) -> Result<Entry> {
        self.stats.record_miss();
        let entry_id = position.entry_id();
        let mut fetched = fetch_range(handle, entry_id, entry_id).await?;
        let entry = fetched.remove(0);
        self.stats.record_miss_bytes(entry.size());
        Ok(entry)
    }

    pub async fn read_entries(&self, handle: &dyn ReadHandle, first: u64, last: u64) -> Result<Vec<Entry>> {
        if last < first {
            return Ok(Vec::new());
        }
        check_confirmed(handle, first, last)?;
        self.stats.record_misses((last - first).saturating_add(1));
        let entries = fetch_range(handle, first, last).await?;
        self.stats
            .record_miss_bytes(entries.iter().map(|e| e.size()).sum());
        Ok(entries)
    }

    pub fn invalidate(&self) -> Removed {
        Removed::default()
    }
}

impl std::fmt::Debug for DisabledEntryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisabledEntryCache")
            .field("ledger", &self.ledger_name())
            .finish()
    }
}
