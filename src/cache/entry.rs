//! Cache Entry Types
//!
//! An [`Entry`] is an immutable, reference-counted log entry. The cache holds
//! one reference while the entry is cached; every reader that receives the
//! entry from a hit or a read-through holds another and releases it when
//! done. The payload is reclaimed only when the last holder lets go.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use super::position::Position;

struct EntryData {
    position: Position,
    data: Bytes,
}

/// Reference-counted log entry
#[derive(Clone)]
pub struct Entry {
    inner: Arc<EntryData>,
}

impl Entry {
    /// Create a new entry holding `data` at `position`
    pub fn new(position: Position, data: impl Into<Bytes>) -> Self {
        Self {
            inner: Arc::new(EntryData {
                position,
                data: data.into(),
            }),
        }
    }

    /// Create an entry from raw ledger/entry ids and a byte slice
    pub fn create(ledger_id: u64, entry_id: u64, data: &[u8]) -> Self {
        Self::new(Position::new(ledger_id, entry_id), Bytes::copy_from_slice(data))
    }

    #[inline]
    pub fn position(&self) -> Position {
        self.inner.position
    }

    #[inline]
    pub fn ledger_id(&self) -> u64 {
        self.inner.position.ledger_id()
    }

    #[inline]
    pub fn entry_id(&self) -> u64 {
        self.inner.position.entry_id()
    }

    /// Payload (zero-copy)
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.inner.data
    }

    /// Payload length in bytes; this is what the cache accounts for
    #[inline]
    pub fn size(&self) -> u64 {
        self.inner.data.len() as u64
    }

    /// Take an additional reference for a new holder
    #[inline]
    pub fn retain(&self) -> Entry {
        self.clone()
    }

    /// Give up this holder's reference
    ///
    /// Other holders keep the payload alive; it is dropped once the count
    /// reaches zero.
    #[inline]
    pub fn release(self) {
        drop(self)
    }

    /// Number of live references to this entry
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether two handles refer to the same cached entry
    #[inline]
    pub fn ptr_eq(&self, other: &Entry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("position", &self.inner.position)
            .field("size", &self.size())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.position() == other.position() && self.data() == other.data()
    }
}

impl Eq for Entry {}

// =============================================================================
// Tests
// =============================================================================
