//! Entry cache handle
//!
//! [`EntryCache`] is what the manager hands out per ledger: either the
//! active [`LedgerEntryCache`] or, when the budget is zero, the
//! [`DisabledEntryCache`]. The variant is fixed when the ledger's cache is
//! created.

use std::sync::Arc;

use super::disabled::DisabledEntryCache;
use super::entry::Entry;
use super::ledger_cache::{LedgerEntryCache, Removed};
use super::position::Position;
use crate::domain::ports::{ReadEntriesCallback, ReadEntryCallback, ReadHandle};
use crate::error::Result;

/// Cheap-to-clone handle on one ledger's cache
#[derive(Clone, Debug)]
pub enum EntryCache {
    Active(Arc<LedgerEntryCache>),
    Disabled(Arc<DisabledEntryCache>),
}

impl EntryCache {
    pub fn ledger_name(&self) -> &str {
        match self {
            EntryCache::Active(c) => c.ledger_name(),
            EntryCache::Disabled(c) => c.ledger_name(),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, EntryCache::Disabled(_))
    }

    /// Admit an entry; `false` means the position was already cached (or the
    /// cache has been removed)
    pub fn insert(&self, entry: Entry) -> bool {
        match self {
            EntryCache::Active(c) => c.insert(entry),
            EntryCache::Disabled(c) => c.insert(entry),
        }
    }

    pub fn get_size(&self) -> u64 {
        match self {
            EntryCache::Active(c) => c.get_size(),
            EntryCache::Disabled(c) => c.get_size(),
        }
    }

    pub fn entries_count(&self) -> usize {
        match self {
            EntryCache::Active(c) => c.entries_count(),
            EntryCache::Disabled(_) => 0,
        }
    }

    /// Cached entry at `position` without recording a hit or miss
    pub fn get_entry(&self, position: Position) -> Option<Entry> {
        match self {
            EntryCache::Active(c) => c.get_entry(position),
            EntryCache::Disabled(_) => None,
        }
    }

    /// Remove entries of `last_position`'s ledger up to and including it
    pub fn invalidate_entries(&self, last_position: Position) -> Removed {
        match self {
            EntryCache::Active(c) => c.invalidate_entries(last_position),
            EntryCache::Disabled(c) => c.invalidate(),
        }
    }

    /// Remove every entry of one ledger id
    pub fn invalidate_all_entries(&self, ledger_id: u64) -> Removed {
        match self {
            EntryCache::Active(c) => c.invalidate_all_entries(ledger_id),
            EntryCache::Disabled(c) => c.invalidate(),
        }
    }

    /// Remove every cached entry
    pub fn invalidate_all(&self) -> Removed {
        match self {
            EntryCache::Active(c) => c.invalidate_all(),
            EntryCache::Disabled(c) => c.invalidate(),
        }
    }

    pub(crate) fn close(&self) -> Removed {
        match self {
            EntryCache::Active(c) => c.close(),
            EntryCache::Disabled(c) => c.invalidate(),
        }
    }

    /// Read one entry through the cache
    pub async fn read_entry(&self, handle: &dyn ReadHandle, position: Position) -> Result<Entry> {
        match self {
            EntryCache::Active(c) => c.read_entry(handle, position).await,
            EntryCache::Disabled(c) => c.read_entry(handle, position).await,
        }
    }

    /// Read `first..=last` of the handle's ledger through the cache
    pub async fn read_entries(&self, handle: &dyn ReadHandle, first: u64, last: u64) -> Result<Vec<Entry>> {
        match self {
            EntryCache::Active(c) => c.read_entries(handle, first, last).await,
            EntryCache::Disabled(c) => c.read_entries(handle, first, last).await,
        }
    }

    /// Callback flavour of [`read_entry`](Self::read_entry)
    ///
    /// The callback always runs on the ledger's executor, never before this
    /// call returns.
    pub fn async_read_entry(
        &self,
        handle: Arc<dyn ReadHandle>,
        position: Position,
        callback: Box<dyn ReadEntryCallback>,
    ) {
        let cache = self.clone();
        self.executor().spawn(async move {
            match cache.read_entry(&*handle, position).await {
                Ok(entry) => callback.read_entry_complete(entry),
                Err(e) => callback.read_entry_failed(e),
            }
        });
    }

    /// Callback flavour of [`read_entries`](Self::read_entries)
    pub fn async_read_entries(
        &self,
        handle: Arc<dyn ReadHandle>,
        first: u64,
        last: u64,
        callback: Box<dyn ReadEntriesCallback>,
    ) {
        let cache = self.clone();
        self.executor().spawn(async move {
            match cache.read_entries(&*handle, first, last).await {
                Ok(entries) => callback.read_entries_complete(entries),
                Err(e) => callback.read_entries_failed(e),
            }
        });
    }

    fn executor(&self) -> tokio::runtime::Handle {
        match self {
            EntryCache::Active(c) => c.ledger().executor(),
            EntryCache::Disabled(c) => c.ledger().executor(),
        }
    }
}
