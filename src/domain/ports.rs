//! Domain Ports (Port/Adapter Pattern)
//!
//! Narrow interfaces through which the entry cache talks to the rest of the
//! storage engine. Adapters in [`crate::adapters`] implement them.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     Entry Cache Core                       │
//! │   ReadHandle │ LedgerContext │ ReadEntryCallback           │
//! └───────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │                         Adapters                           │
//! │   InMemoryLedgerStore │ StaticLedgerContext                │
//! └───────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::cache::{Entry, Position};
use crate::config::LedgerConfig;
use crate::error::{Error, StorageError};

// =============================================================================
// Durable storage
// =============================================================================

/// One entry as returned by durable storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub entry_id: u64,
    pub data: Bytes,
}

impl RawEntry {
    pub fn new(entry_id: u64, data: impl Into<Bytes>) -> Self {
        Self {
            entry_id,
            data: data.into(),
        }
    }
}

/// Read access to one durable ledger
#[async_trait]
pub trait ReadHandle: Send + Sync {
    /// Ledger this handle reads from
    fn ledger_id(&self) -> u64;

    /// Last entry id confirmed durable, if any
    fn last_add_confirmed(&self) -> Option<u64>;

    /// Read entries `first..=last`, returned in entry-id order
    async fn read_entries(&self, first: u64, last: u64) -> Result<Vec<RawEntry>, StorageError>;
}

// =============================================================================
// Owning ledger
// =============================================================================

/// Identity and configuration of the managed ledger that owns a cache
pub trait LedgerContext: Send + Sync {
    /// Ledger name, the cache registry key
    fn name(&self) -> &str;

    /// Per-ledger configuration
    fn config(&self) -> LedgerConfig;

    /// Executor on which read callbacks are delivered
    fn executor(&self) -> tokio::runtime::Handle;

    /// Mark-deleted position of the slowest active cursor, `None` when no
    /// cursor is active
    fn slowest_reader_position(&self) -> Option<Position>;
}

// =============================================================================
// Callbacks
// =============================================================================

/// Completion callback for a single-entry read
pub trait ReadEntryCallback: Send + 'static {
    fn read_entry_complete(self: Box<Self>, entry: Entry);

    fn read_entry_failed(self: Box<Self>, error: Error);
}

/// Completion callback for a range read
pub trait ReadEntriesCallback: Send + 'static {
    fn read_entries_complete(self: Box<Self>, entries: Vec<Entry>);

    fn read_entries_failed(self: Box<Self>, error: Error);
}

/// Adapts a closure receiving the read result into a single-entry callback
pub struct FnReadEntryCallback<F>(pub F);

impl<F> ReadEntryCallback for FnReadEntryCallback<F>
where
    F: FnOnce(crate::error::Result<Entry>) + Send + 'static,
{
    fn read_entry_complete(self: Box<Self>, entry: Entry) {
        (self.0)(Ok(entry))
    }

    fn read_entry_failed(self: Box<Self>, error: Error) {
        (self.0)(Err(error))
    }
}

/// Adapts a closure receiving the read result into a range callback
pub struct FnReadEntriesCallback<F>(pub F);

impl<F> ReadEntriesCallback for FnReadEntriesCallback<F>
where
    F: FnOnce(crate::error::Result<Vec<Entry>>) + Send + 'static,
{
    fn read_entries_complete(self: Box<Self>, entries: Vec<Entry>) {
        (self.0)(Ok(entries))
    }

    fn read_entries_failed(self: Box<Self>, error: Error) {
        (self.0)(Err(error))
    }
}
