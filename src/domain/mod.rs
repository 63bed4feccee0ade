//! Domain Layer
//!
//! Port traits the entry cache depends on. The durable storage driver and
//! the managed ledger are external collaborators reached only through
//! these interfaces.
//!
//! # Usage
//!
//! ```ignore
//! use ledger_cache::domain::{LedgerContext, ReadHandle};
//!
//! async fn warm<R: ReadHandle>(handle: &R) -> Result<(), StorageError> {
//!     let entries = handle.read_entries(0, 9).await?;
//!     // ...
//! }
//! ```

pub mod ports;

pub use ports::{
    FnReadEntriesCallback, FnReadEntryCallback, LedgerContext, RawEntry, ReadEntriesCallback,
    ReadEntryCallback, ReadHandle,
};
