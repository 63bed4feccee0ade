//! Entry positions

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of one entry: `(ledger_id, entry_id)`
///
/// Ordered by ledger id first, then entry id, which makes it usable both as
/// a cache key and as an inclusive boundary for range invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    ledger_id: u64,
    entry_id: u64,
}

impl Position {
    pub const fn new(ledger_id: u64, entry_id: u64) -> Self {
        Self { ledger_id, entry_id }
    }

    #[inline]
    pub fn ledger_id(&self) -> u64 {
        self.ledger_id
    }

    #[inline]
    pub fn entry_id(&self) -> u64 {
        self.entry_id
    }

    /// First position of a ledger
    #[inline]
    pub fn first_of(ledger_id: u64) -> Position {
        Position::new(ledger_id, 0)
    }

    /// Last possible position of a ledger
    #[inline]
    pub fn last_of(ledger_id: u64) -> Position {
        Position::new(ledger_id, u64::MAX)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ledger_id, self.entry_id)
    }
}
