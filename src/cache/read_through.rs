//! Read-through helpers shared by the active and disabled caches

use futures::future::try_join_all;

use super::entry::Entry;
use super::position::Position;
use crate::domain::ports::ReadHandle;
use crate::error::{Error, Result, StorageError};

/// Fail with a missing entry when `last` is past the handle's last
/// confirmed entry
pub(crate) fn check_confirmed(handle: &dyn ReadHandle, first: u64, last: u64) -> Result<()> {
    let entry_id = match handle.last_add_confirmed() {
        Some(confirmed) if last <= confirmed => return Ok(()),
        Some(confirmed) => first.max(confirmed + 1),
        None => first,
    };
    Err(missing(handle.ledger_id(), first, last, entry_id))
}

/// Read `first..=last` of the handle's ledger from storage
///
/// Storage failures come back wrapped as [`Error::DurableRead`]. A short or
/// out-of-order response is reported as a missing entry.
pub(crate) async fn fetch_range(handle: &dyn ReadHandle, first: u64, last: u64) -> Result<Vec<Entry>> {
    let ledger_id = handle.ledger_id();
    if last < first {
        return Ok(Vec::new());
    }
    check_confirmed(handle, first, last)?;

    let raw = handle
        .read_entries(first, last)
        .await
        .map_err(|e| Error::durable_read(ledger_id, first, last, e))?;

    let mut entries = Vec::with_capacity(raw.len());
    for (expected, raw) in (first..=last).zip(raw.into_iter()) {
        if raw.entry_id != expected {
            return Err(missing(ledger_id, first, last, expected));
        }
        entries.push(Entry::new(Position::new(ledger_id, raw.entry_id), raw.data));
    }

    if (entries.len() as u64) <= last - first {
        let entry_id = first + entries.len() as u64;
        return Err(missing(ledger_id, first, last, entry_id));
    }

    Ok(entries)
}

/// Fetch several disjoint runs concurrently; all succeed or the first
/// failure is returned
pub(crate) async fn fetch_runs(handle: &dyn ReadHandle, runs: &[(u64, u64)]) -> Result<Vec<Vec<Entry>>> {
    try_join_all(runs.iter().map(|&(first, last)| fetch_range(handle, first, last))).await
}

/// Gaps of `first..=last` not covered by `cached`, as inclusive entry-id
/// ranges
///
/// `cached` must be ascending and within `first..=last`.
pub(crate) fn missing_runs(cached: impl IntoIterator<Item = u64>, first: u64, last: u64) -> Vec<(u64, u64)> {
    let mut runs = Vec::new();
    let mut next = first;

    for entry_id in cached {
        if entry_id > next {
            runs.push((next, entry_id - 1));
        }
        match entry_id.checked_add(1) {
            Some(n) => next = n,
            None => return runs,
        }
    }
    if next <= last {
        runs.push((next, last));
    }

    runs
}

fn missing(ledger_id: u64, first: u64, last: u64, entry_id: u64) -> Error {
    Error::durable_read(ledger_id, first, last, StorageError::NoSuchEntry { ledger_id, entry_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedgerStore;
    use crate::domain::ports::RawEntry;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::Arc;

    #[test]
    fn test_missing_runs() {
        assert_eq!(missing_runs([11, 12, 15], 10, 16), vec![(10, 10), (13, 14), (16, 16)]);
        assert!(missing_runs([0, 1], 0, 1).is_empty());
        assert_eq!(missing_runs(Vec::new(), 5, 7), vec![(5, 7)]);
        assert_eq!(missing_runs([u64::MAX], u64::MAX - 1, u64::MAX), vec![(u64::MAX - 1, u64::MAX - 1)]);
    }

    #[tokio::test]
    async fn test_range_past_confirmed_is_missing_entry() {
        let store = Arc::new(InMemoryLedgerStore::new());
        store.append(2, vec![0u8; 1]);
        store.append(2, vec![0u8; 1]);
        let handle = store.open(2);

        assert!(check_confirmed(&*handle, 0, 1).is_ok());
        assert_matches!(
            check_confirmed(&*handle, 0, u64::MAX).unwrap_err().storage_error(),
            Some(StorageError::NoSuchEntry { ledger_id: 2, entry_id: 2 })
        );
        assert_matches!(
            check_confirmed(&*store.open(9), 4, 5).unwrap_err().storage_error(),
            Some(StorageError::NoSuchEntry { ledger_id: 9, entry_id: 4 })
        );

        // Rejected before storage is touched
        assert!(fetch_range(&*handle, 1, u64::MAX).await.is_err());
        assert_eq!(store.stats().read_calls, 0);
    }

    #[tokio::test]
    async fn test_fetch_range_builds_positions() {
        let store = Arc::new(InMemoryLedgerStore::new());
        for i in 0..4u8 {
            store.append(3, vec![i; 2]);
        }

        let entries = fetch_range(&*store.open(3), 1, 3).await.unwrap();
        let positions: Vec<_> = entries.iter().map(|e| e.position()).collect();
        assert_eq!(
            positions,
            vec![Position::new(3, 1), Position::new(3, 2), Position::new(3, 3)]
        );
    }

    struct ShortReader;

    #[async_trait]
    impl ReadHandle for ShortReader {
        fn ledger_id(&self) -> u64 {
            8
        }

        fn last_add_confirmed(&self) -> Option<u64> {
            Some(10)
        }

        async fn read_entries(&self, first: u64, _last: u64) -> std::result::Result<Vec<RawEntry>, StorageError> {
            Ok(vec![RawEntry::new(first, vec![0u8; 1])])
        }
    }

    #[tokio::test]
    async fn test_short_response_is_missing_entry() {
        let err = fetch_range(&ShortReader, 0, 2).await.unwrap_err();
        assert_matches!(
            err.storage_error(),
            Some(StorageError::NoSuchEntry {
                ledger_id: 8,
                entry_id: 1
            })
        );
    }

    #[tokio::test]
    async fn test_fetch_runs_fails_as_a_whole() {
        let store = Arc::new(InMemoryLedgerStore::new());
        store.append(1, vec![0u8; 1]);

        let result = fetch_runs(&*store.open(1), &[(0, 0), (5, 6)]).await;
        assert_matches!(result, Err(Error::DurableRead { ledger_id: 1, .. }));
    }
}
