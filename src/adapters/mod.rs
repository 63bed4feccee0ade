//! Infrastructure Adapters
//!
//! Concrete implementations of the domain ports.
//!
//! # Usage
//!
//! ```ignore
//! use ledger_cache::adapters::{InMemoryLedgerStore, StaticLedgerContext};
//!
//! let store = Arc::new(InMemoryLedgerStore::new());
//! store.append(1, Bytes::from_static(b"entry-0"));
//! let handle = store.open(1);
//! let ledger = Arc::new(StaticLedgerContext::new("my-topic"));
//! ```

mod ledger_context;
mod ledger_store;

pub use ledger_context::StaticLedgerContext;
pub use ledger_store::{InMemoryLedgerStore, LedgerReadHandle, LedgerStoreStats};
