//! In-Memory Ledger Store
//!
//! `ReadHandle` implementation backed by DashMap, used by tests and the
//! workload binary in place of the durable storage driver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::domain::ports::{RawEntry, ReadHandle};
use crate::error::StorageError;

/// In-memory ledger storage
///
/// Ledgers are append-only sequences of entries keyed by ledger id.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    /// ledger id -> entries (index == entry id)
    ledgers: DashMap<u64, Vec<Bytes>>,
    /// Ledgers whose reads fail with the stored error
    failures: DashMap<u64, StorageError>,
    /// Statistics
    read_calls: AtomicU64,
    entries_read: AtomicU64,
    bytes_read: AtomicU64,
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStoreStats {
    pub ledger_count: u64,
    pub read_calls: u64,
    pub entries_read: u64,
    pub bytes_read: u64,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, returning its entry id
    pub fn append(&self, ledger_id: u64, data: impl Into<Bytes>) -> u64 {
        let mut ledger = self.ledgers.entry(ledger_id).or_default();
        ledger.push(data.into());
        ledger.len() as u64 - 1
    }

    /// Make every subsequent read of `ledger_id` fail with `error`
    pub fn fail_reads(&self, ledger_id: u64, error: StorageError) {
        self.failures.insert(ledger_id, error);
    }

    /// Undo [`fail_reads`](Self::fail_reads)
    pub fn heal(&self, ledger_id: u64) {
        self.failures.remove(&ledger_id);
    }

    /// Read handle for one ledger
    pub fn open(self: &Arc<Self>, ledger_id: u64) -> Arc<LedgerReadHandle> {
        Arc::new(LedgerReadHandle {
            store: Arc::clone(self),
            ledger_id,
        })
    }

    pub fn last_entry_id(&self, ledger_id: u64) -> Option<u64> {
        self.ledgers
            .get(&ledger_id)
            .and_then(|l| (l.len() as u64).checked_sub(1))
    }

    pub fn stats(&self) -> LedgerStoreStats {
        LedgerStoreStats {
            ledger_count: self.ledgers.len() as u64,
            read_calls: self.read_calls.load(Ordering::Relaxed),
            entries_read: self.entries_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }

    fn read(&self, ledger_id: u64, first: u64, last: u64) -> Result<Vec<RawEntry>, StorageError> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);

        if let Some(error) = self.failures.get(&ledger_id) {
            return Err(error.clone());
        }

        let ledger = self
            .ledgers
            .get(&ledger_id)
            .ok_or(StorageError::NoSuchEntry {
                ledger_id,
                entry_id: first,
            })?;

        let available = (ledger.len() as u64).saturating_sub(first);
        let mut entries = Vec::with_capacity(last.saturating_sub(first).min(available) as usize);
        for entry_id in first..=last {
            let data = ledger
                .get(entry_id as usize)
                .ok_or(StorageError::NoSuchEntry { ledger_id, entry_id })?;
            entries.push(RawEntry::new(entry_id, data.clone()));
        }

        let bytes: u64 = entries.iter().map(|e| e.data.len() as u64).sum();
        self.entries_read
            .fetch_add(entries.len() as u64, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);

        Ok(entries)
    }
}

/// Read handle onto one ledger of an [`InMemoryLedgerStore`]
pub struct LedgerReadHandle {
    store: Arc<InMemoryLedgerStore>,
    ledger_id: u64,
}

#[async_trait]
impl ReadHandle for LedgerReadHandle {
    fn ledger_id(&self) -> u64 {
        self.ledger_id
    }

    fn last_add_confirmed(&self) -> Option<u64> {
        self.store.last_entry_id(self.ledger_id)
    }

    async fn read_entries(&self, first: u64, last: u64) -> Result<Vec<RawEntry>, StorageError> {
        // Completion is always observed after a scheduling point, like a real driver
        tokio::task::yield_now().await;
        self.store.read(self.ledger_id, first, last)
    }
}

// =============================================================================
// Tests
// =============================================================================
