//! Ledger Cache - Shared Entry Cache for a Distributed Log Store
//!
//! Caches ledger entries in memory so tailing readers are served without a
//! round trip to durable storage. Every managed ledger gets its own cache;
//! all of them share one byte budget enforced by a background evictor.
//!
//! # Architecture
//!
//! ```text
//! writer ──insert──► EntryCache ◄──read──── reader
//!                        │ miss
//!                        ▼
//!                   ReadHandle (durable storage)
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - In-memory ledger storage and ledger context
//! - [`cache`] - Entry caches, the cache manager and eviction
//! - [`config`] - Manager and per-ledger configuration
//! - [`domain`] - Ports to the ledger and its storage
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus export of cache statistics

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use cache::{CacheReport, Entry, EntryCache, EntryCacheManager, Position};
pub use config::{CacheManagerConfig, LedgerConfig};
pub use error::{Error, Result, StorageError};
pub use metrics::CacheMetricsExporter;
