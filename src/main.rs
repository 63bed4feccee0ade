//! Ledger Cache Workload Driver
//!
//! Runs a bounded synthetic workload against the shared entry cache: writers
//! append to in-memory ledgers and insert into the cache the way the write
//! path does, tailing readers read through it and release what every reader
//! has consumed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      ledger-cache driver                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Writers    │───▶│ EntryCache   │◀───│   Readers    │       │
//! │  │ (per ledger) │    │   Manager    │    │ (per ledger) │       │
//! │  └──────┬───────┘    └──────┬───────┘    └──────┬───────┘       │
//! │         ▼                   ▼ stats             │ miss          │
//! │   InMemoryLedgerStore   Prometheus  ◀───────────┘               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use tokio::task::JoinSet;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ledger_cache::adapters::{InMemoryLedgerStore, StaticLedgerContext};
use ledger_cache::cache::DEFAULT_STATS_PERIOD;
use ledger_cache::{
    CacheManagerConfig, CacheMetricsExporter, Entry, EntryCache, EntryCacheManager, LedgerConfig,
    Position,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Ledger Cache - shared entry cache workload driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file with a cache manager configuration (flags override it)
    #[arg(long, env = "LEDGER_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Cache budget in bytes (0 disables caching)
    #[arg(long, env = "LEDGER_CACHE_MAX_SIZE")]
    max_cache_size: Option<u64>,

    /// Fraction of the budget a size-triggered eviction brings usage down to
    #[arg(long, env = "LEDGER_CACHE_EVICTION_WATERMARK")]
    eviction_watermark: Option<f64>,

    /// Period of the background eviction task in milliseconds
    #[arg(long, env = "LEDGER_CACHE_EVICTION_INTERVAL_MS")]
    eviction_interval_ms: Option<u64>,

    /// Maximum age of a cached entry in milliseconds
    #[arg(long, env = "LEDGER_CACHE_EVICTION_THRESHOLD_MS")]
    eviction_time_threshold_ms: Option<u64>,

    /// Number of ledgers written concurrently
    #[arg(long, env = "LEDGER_CACHE_LEDGERS", default_value = "4")]
    ledgers: u64,

    /// Entries appended to each ledger
    #[arg(long, env = "LEDGER_CACHE_ENTRIES_PER_LEDGER", default_value = "5000")]
    entries_per_ledger: u64,

    /// Payload size of each entry in bytes
    #[arg(long, env = "LEDGER_CACHE_ENTRY_SIZE", default_value = "1024")]
    entry_size: usize,

    /// Tailing readers per ledger
    #[arg(long, env = "LEDGER_CACHE_READERS_PER_LEDGER", default_value = "2")]
    readers_per_ledger: usize,

    /// Entries fetched per read
    #[arg(long, env = "LEDGER_CACHE_READ_BATCH", default_value = "32")]
    read_batch: u64,

    /// Prefer evicting entries every reader has consumed
    #[arg(long, env = "LEDGER_CACHE_EVICT_BY_MARK_DELETED")]
    evict_by_mark_deleted: bool,

    /// Stats refresh period in seconds
    #[arg(long, env = "LEDGER_CACHE_STATS_PERIOD_SECONDS")]
    stats_period_seconds: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// File configuration (or defaults) with flag overrides applied
    fn cache_config(&self) -> Result<CacheManagerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => CacheManagerConfig::default(),
        };

        if let Some(max) = self.max_cache_size {
            config = config.with_max_cache_size(max);
        }
        if let Some(watermark) = self.eviction_watermark {
            config = config.with_eviction_watermark(watermark);
        }
        if let Some(ms) = self.eviction_interval_ms {
            config = config.with_eviction_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.eviction_time_threshold_ms {
            config = config.with_eviction_time_threshold(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }

    fn stats_period(&self) -> Duration {
        self.stats_period_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STATS_PERIOD)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = args.cache_config()?;
    info!("Starting ledger cache workload");
    info!("  Cache budget: {} bytes", config.max_cache_size);
    info!("  Eviction watermark: {}", config.cache_eviction_watermark);
    info!(
        "  Ledgers: {} x {} entries of {} bytes",
        args.ledgers, args.entries_per_ledger, args.entry_size
    );
    info!("  Readers per ledger: {}", args.readers_per_ledger);

    let store = Arc::new(InMemoryLedgerStore::new());
    let manager = Arc::new(EntryCacheManager::new(config)?);
    let exporter = CacheMetricsExporter::new()?;

    let ledger_config =
        LedgerConfig::default().with_eviction_by_mark_deleted_position(args.evict_by_mark_deleted);

    let mut tasks = JoinSet::new();
    for ledger_id in 1..=args.ledgers {
        let ctx = Arc::new(StaticLedgerContext::with_config(
            format!("public/default/persistent/topic-{}", ledger_id),
            ledger_config.clone(),
        ));
        let cache = manager.get_entry_cache(ctx.clone())?;
        let cursors = Arc::new(Cursors::new(args.readers_per_ledger));

        tasks.spawn(write_ledger(
            store.clone(),
            cache.clone(),
            ledger_id,
            args.entries_per_ledger,
            args.entry_size,
        ));

        for reader in 0..args.readers_per_ledger {
            tasks.spawn(tail_ledger(TailReader {
                store: store.clone(),
                cache: cache.clone(),
                ctx: ctx.clone(),
                cursors: cursors.clone(),
                reader,
                ledger_id,
                entries: args.entries_per_ledger,
                batch: args.read_batch.max(1),
            }));
        }
    }

    let stats_manager = manager.clone();
    let period = args.stats_period();
    let stats_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = stats_manager.refresh_stats(period);
            info!(
                used_size = report.used_size,
                entries = report.entries_count,
                hits_rate = report.hits_rate,
                misses_rate = report.misses_rate,
                evictions = report.eviction_count,
                "Cache stats"
            );
        }
    });

    while let Some(result) = tasks.join_next().await {
        result.context("workload task panicked")??;
    }
    stats_task.abort();

    manager.wait_for_pending_cache_evictions().await;
    let report = manager.refresh_stats_now();
    exporter.publish(&report);

    info!(
        "Workload complete: {} inserted, {} evicted, hit ratio {:.3}, store reads {}",
        report.inserted_entries_count,
        report.evicted_entries_count,
        report.hit_ratio,
        store.stats().read_calls
    );

    println!("{}", serde_json::to_string_pretty(&report)?);
    print!("{}", exporter.render()?);

    manager.shutdown().await;
    Ok(())
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Workload
// =============================================================================

/// Append `entries` payloads and insert each into the cache
async fn write_ledger(
    store: Arc<InMemoryLedgerStore>,
    cache: EntryCache,
    ledger_id: u64,
    entries: u64,
    entry_size: usize,
) -> Result<()> {
    for i in 0..entries {
        let data = Bytes::from(vec![(i % 251) as u8; entry_size]);
        let entry_id = store.append(ledger_id, data.clone());
        cache.insert(Entry::new(Position::new(ledger_id, entry_id), data));

        if i % 64 == 63 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    debug!(ledger_id, entries, "Writer finished");
    Ok(())
}

/// Read positions of the tailing readers of one ledger
struct Cursors {
    read: Vec<AtomicU64>,
}

impl Cursors {
    fn new(readers: usize) -> Self {
        Self {
            read: (0..readers).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Record that `reader` consumed everything before `next`; returns the
    /// first entry not yet consumed by every reader
    fn advance(&self, reader: usize, next: u64) -> u64 {
        self.read[reader].store(next, Ordering::Release);
        self.read
            .iter()
            .map(|r| r.load(Ordering::Acquire))
            .min()
            .unwrap_or(next)
    }
}

struct TailReader {
    store: Arc<InMemoryLedgerStore>,
    cache: EntryCache,
    ctx: Arc<StaticLedgerContext>,
    cursors: Arc<Cursors>,
    reader: usize,
    ledger_id: u64,
    entries: u64,
    batch: u64,
}

/// Follow the ledger to its end in batches, releasing what every reader
/// has consumed
async fn tail_ledger(r: TailReader) -> Result<()> {
    let handle = r.store.open(r.ledger_id);
    let mut next = 0u64;

    while next < r.entries {
        let last = (next + r.batch - 1).min(r.entries - 1);
        while r.store.last_entry_id(r.ledger_id).map_or(true, |l| l < last) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let read = r.cache.read_entries(&*handle, next, last).await?;
        next = last + 1;
        drop(read);

        let slowest = r.cursors.advance(r.reader, next);
        if slowest > 0 {
            let mark_deleted = Position::new(r.ledger_id, slowest - 1);
            r.ctx.set_slowest_reader_position(Some(mark_deleted));
            r.cache.invalidate_entries(mark_deleted);
        }
    }

    debug!(ledger_id = r.ledger_id, reader = r.reader, "Reader finished");
    Ok(())
}
