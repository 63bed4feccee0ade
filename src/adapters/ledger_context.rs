//! Static Ledger Context
//!
//! Fixed-identity `LedgerContext` whose slowest-reader position is set
//! explicitly by the caller, standing in for a managed ledger with cursors.

use parking_lot::RwLock;

use crate::cache::Position;
use crate::config::LedgerConfig;
use crate::domain::ports::LedgerContext;

/// Ledger context with caller-driven cursor state
pub struct StaticLedgerContext {
    name: String,
    config: LedgerConfig,
    executor: tokio::runtime::Handle,
    slowest_reader: RwLock<Option<Position>>,
}

impl StaticLedgerContext {
    /// Create a context bound to the current tokio runtime
    ///
    /// Panics when called outside a runtime, like `tokio::spawn`.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, LedgerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: LedgerConfig) -> Self {
        Self::with_executor(name, config, tokio::runtime::Handle::current())
    }

    pub fn with_executor(
        name: impl Into<String>,
        config: LedgerConfig,
        executor: tokio::runtime::Handle,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            executor,
            slowest_reader: RwLock::new(None),
        }
    }

    /// Record the slowest active cursor's mark-deleted position
    pub fn set_slowest_reader_position(&self, position: Option<Position>) {
        *self.slowest_reader.write() = position;
    }
}

impl LedgerContext for StaticLedgerContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> LedgerConfig {
        self.config.clone()
    }

    fn executor(&self) -> tokio::runtime::Handle {
        self.executor.clone()
    }

    fn slowest_reader_position(&self) -> Option<Position> {
        *self.slowest_reader.read()
    }
}

impl std::fmt::Debug for StaticLedgerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticLedgerContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_accessors() {
        let ctx = StaticLedgerContext::with_config(
            "persistent://tenant/ns/topic",
            LedgerConfig::default().with_eviction_by_mark_deleted_position(true),
        );
        assert_eq!(ctx.name(), "persistent://tenant/ns/topic");
        assert!(ctx.config().cache_eviction_by_mark_deleted_position);
        assert_eq!(ctx.slowest_reader_position(), None);

        ctx.set_slowest_reader_position(Some(Position::new(1, 5)));
        assert_eq!(ctx.slowest_reader_position(), Some(Position::new(1, 5)));
    }
}
