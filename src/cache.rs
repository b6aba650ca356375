//! The in-memory ring buffer of recently appended entries (spec §4.3).
//!
//! Lookups in a consensus log skew heavily toward the tail -- a leader distributing recent
//! entries, a follower catching up -- so [`EntryCache`] keeps the most recently appended entries
//! in a growable ring buffer behind [`crate::entry::EntryLifecycle`], falling back to the durable
//! log only on a miss. The cache never becomes the sole owner of an entry: the consensus engine
//! holds its own reference independent of whatever the cache does.

use std::sync::Arc;

use tracing::trace;

use crate::entry::{EntryLifecycle, LogEntry, LogIndex};
use crate::error::CacheError;

/// Initial physical capacity of a freshly constructed [`EntryCache`]; doubles on overflow.
pub const INIT_SIZE: usize = 512;

/// A wrap-around ring buffer of `Arc<LogEntry>`, indexed by the same [`LogIndex`] the durable log
/// uses.
pub struct EntryCache<L: EntryLifecycle> {
    ptrs: Vec<Option<Arc<LogEntry>>>,
    /// Physical offset of the logical entry at `start_idx`.
    start: usize,
    /// Number of occupied slots.
    len: usize,
    /// `LogIndex` of the logical first cached entry, or 0 when empty.
    start_idx: LogIndex,
    lifecycle: L,
}

impl<L: EntryLifecycle> EntryCache<L> {
    pub fn new(lifecycle: L) -> Self {
        Self::with_capacity(INIT_SIZE, lifecycle)
    }

    /// Constructs a cache with an explicit initial physical capacity. Exposed so tests can
    /// exercise growth and wraparound without appending hundreds of entries (spec §8, S4/S5).
    pub fn with_capacity(capacity: usize, lifecycle: L) -> Self {
        assert!(capacity > 0, "cache capacity must be non-zero");
        Self {
            ptrs: (0..capacity).map(|_| None).collect(),
            start: 0,
            len: 0,
            start_idx: 0,
            lifecycle,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.ptrs.len()
    }

    pub fn start_idx(&self) -> LogIndex {
        self.start_idx
    }

    /// Appends `entry` at `idx`, growing the backing array if it is full. `idx` must be exactly
    /// one past the cache's current logical tail (or, for an empty cache, any index at all --
    /// the cache adopts it as its new `start_idx`).
    pub fn append(&mut self, entry: Arc<LogEntry>, idx: LogIndex) -> Result<(), CacheError> {
        if self.len == 0 {
            self.start_idx = idx;
        } else if self.start_idx + self.len as u64 != idx {
            return Err(CacheError::NonContiguousAppend {
                start_idx: self.start_idx,
                len: self.len,
                idx,
            });
        }

        if self.len == self.ptrs.len() {
            self.grow();
        }

        let slot = (self.start + self.len) % self.ptrs.len();
        self.lifecycle.hold(&entry);
        self.ptrs[slot] = Some(entry);
        self.len += 1;
        Ok(())
    }

    /// Returns a fresh strong reference to the entry at `idx`, or `None` if `idx` is outside the
    /// cache's live range.
    pub fn get(&self, idx: LogIndex) -> Option<Arc<LogEntry>> {
        if idx < self.start_idx || idx - self.start_idx >= self.len as u64 {
            return None;
        }
        let offset = (idx - self.start_idx) as usize;
        let slot = (self.start + offset) % self.ptrs.len();
        let entry = self.ptrs[slot].as_ref().expect("occupied slot held no entry");
        self.lifecycle.hold(entry);
        Some(Arc::clone(entry))
    }

    /// Evicts entries from the front of the cache until `start_idx == first_idx` or the cache is
    /// empty. Returns the number of entries removed, or an error if `first_idx` precedes the
    /// cache's current `start_idx`.
    pub fn delete_head(&mut self, first_idx: LogIndex) -> Result<u64, CacheError> {
        if first_idx < self.start_idx {
            return Err(CacheError::OutOfRange { idx: first_idx });
        }

        let mut removed = 0u64;
        while self.len > 0 && self.start_idx < first_idx {
            let entry = self.ptrs[self.start].take().expect("occupied slot held no entry");
            self.lifecycle.release(&entry);
            self.start = (self.start + 1) % self.ptrs.len();
            self.start_idx += 1;
            self.len -= 1;
            removed += 1;
        }

        if self.len == 0 {
            self.start_idx = 0;
        }
        trace!(removed, "evicted cache head");
        Ok(removed)
    }

    /// Releases and discards every entry at logical position `[from_idx, start_idx + len)`.
    /// Returns an error if `from_idx` is outside the cache's current live range.
    pub fn delete_tail(&mut self, from_idx: LogIndex) -> Result<u64, CacheError> {
        if self.len == 0 || from_idx < self.start_idx || from_idx >= self.start_idx + self.len as u64 {
            return Err(CacheError::OutOfRange { idx: from_idx });
        }

        let keep = (from_idx - self.start_idx) as usize;
        let mut removed = 0u64;
        while self.len > keep {
            self.len -= 1;
            let slot = (self.start + self.len) % self.ptrs.len();
            let entry = self.ptrs[slot].take().expect("occupied slot held no entry");
            self.lifecycle.release(&entry);
            removed += 1;
        }

        if self.len == 0 {
            self.start_idx = 0;
        }
        trace!(removed, "evicted cache tail");
        Ok(removed)
    }

    /// Releases every held entry, leaving the cache empty at its current capacity.
    pub fn free(&mut self) {
        for slot in &mut self.ptrs {
            if let Some(entry) = slot.take() {
                self.lifecycle.release(&entry);
            }
        }
        self.start = 0;
        self.len = 0;
        self.start_idx = 0;
    }

    /// Doubles physical capacity. If the logical ring currently wraps (`start > 0`), the prefix
    /// `[0, start)` is relocated to `[old_size, old_size + start)` so the occupied region stays
    /// contiguous in the new, larger array -- this is what lets growth preserve logical order
    /// without a full re-index (spec §4.3, §8 scenario S5).
    fn grow(&mut self) {
        let old_size = self.ptrs.len();
        let new_size = old_size * 2;
        self.ptrs.resize_with(new_size, || None);

        if self.start > 0 {
            for i in 0..self.start {
                self.ptrs[old_size + i] = self.ptrs[i].take();
            }
        }
        trace!(old_size, new_size, "grew entry cache");
    }
}
