//! Ledger Entry Cache
//!
//! In-memory cache of recently written and recently read ledger entries,
//! shared by every managed ledger of a process under one byte budget.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                       EntryCacheManager                              │
//! │        byte budget · aggregate size · stats · evictor task           │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  EntryCache (ledger-a)   │  EntryCache (ledger-b)   │  ...           │
//! │  ┌────────────────────┐  │  ┌────────────────────┐  │                │
//! │  │ Position -> Entry  │  │  │ Position -> Entry  │  │                │
//! │  │ seq -> Position    │  │  │ seq -> Position    │  │                │
//! │  └────────────────────┘  │  └────────────────────┘  │                │
//! │            │ miss        │            │ miss        │                │
//! │            ▼             │            ▼             │                │
//! │      ReadHandle (durable ledger storage)                             │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Eviction
//!
//! - Size-triggered: once the aggregate exceeds the budget, one pass brings
//!   it down to `floor(max_size * watermark)`, oldest insertion first
//! - Time-based: every interval, entries older than the threshold go
//! - Cursor-aware ledgers give up entries behind their slowest reader first

mod disabled;
mod entry;
mod entry_cache;
mod eviction;
mod ledger_cache;
mod manager;
mod position;
mod read_through;
mod stats;

pub use disabled::DisabledEntryCache;
pub use entry::Entry;
pub use entry_cache::EntryCache;
pub use eviction::PassState;
pub use ledger_cache::{LedgerEntryCache, Removed};
pub use manager::EntryCacheManager;
pub use position::Position;
pub use stats::{CacheGauges, CacheReport, CacheStats, StatsWindow};

/// Default period between two stats refreshes
pub const DEFAULT_STATS_PERIOD: std::time::Duration = std::time::Duration::from_secs(60);
