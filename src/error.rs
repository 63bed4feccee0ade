//! Error types for the ledger entry cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the entry cache layer
#[derive(Error, Debug)]
pub enum Error {
    /// The durable storage read behind a cache miss failed
    #[error("Durable read of ledger {ledger_id} entries {first_entry}..={last_entry} failed: {source}")]
    DurableRead {
        ledger_id: u64,
        first_entry: u64,
        last_entry: u64,
        #[source]
        source: StorageError,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The cache manager was shut down
    #[error("Entry cache manager has been shut down")]
    ManagerShutdown,
}

impl Error {
    /// Wrap a storage failure for the given entry range
    pub fn durable_read(ledger_id: u64, first_entry: u64, last_entry: u64, source: StorageError) -> Self {
        Error::DurableRead {
            ledger_id,
            first_entry,
            last_entry,
            source,
        }
    }

    /// The underlying storage failure, if this error came from a durable read
    pub fn storage_error(&self) -> Option<&StorageError> {
        match self {
            Error::DurableRead { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Failures reported by the durable storage collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The requested entry does not exist
    #[error("No such entry: {ledger_id}:{entry_id}")]
    NoSuchEntry { ledger_id: u64, entry_id: u64 },

    /// The ledger was closed or deleted
    #[error("Ledger {0} is closed")]
    LedgerClosed(u64),

    /// I/O failure talking to storage
    #[error("I/O error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durable_read_display() {
        let err = Error::durable_read(3, 0, 9, StorageError::LedgerClosed(3));
        assert_eq!(
            err.to_string(),
            "Durable read of ledger 3 entries 0..=9 failed: Ledger 3 is closed"
        );
        assert_eq!(err.storage_error(), Some(&StorageError::LedgerClosed(3)));
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;

        let err = Error::durable_read(
            1,
            5,
            5,
            StorageError::NoSuchEntry {
                ledger_id: 1,
                entry_id: 5,
            },
        );
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("No such entry: 1:5"));
        assert!(Error::ManagerShutdown.storage_error().is_none());
    }
}
