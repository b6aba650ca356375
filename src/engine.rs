//! The operation table consumed by the external consensus engine (spec §4.4).
//!
//! [`LogHandle`] is the one polymorphic surface this crate exposes: it assembles a
//! [`DurableLog`] and an [`EntryCache`] behind a single owner, so the opaque handle an `init` call
//! returns can be moved across the adapter boundary without the caller reasoning about the
//! borrow lifetimes of the two layers underneath. There is no dynamic dispatch inside the hot
//! paths themselves -- `init` binds the capability once, and every subsequent call is a direct
//! method call on the bound `LogHandle`.

use std::path::Path;

use parking_lot::Mutex;
use tracing::instrument;

use crate::cache::EntryCache;
use crate::config::Config;
use crate::durable_log::DurableLog;
use crate::entry::{EntryLifecycle, LogEntry, LogIndex};
use crate::error::EngineError;

/// Durable log + entry cache, assembled behind one owner and guarded by a single lock so the
/// handle `init` returns can be shared the way the consensus engine's host-context pointer is
/// shared: one logical owner, reachable from wherever the engine holds the handle.
pub struct LogHandle<L: EntryLifecycle> {
    inner: Mutex<Inner<L>>,
}

struct Inner<L: EntryLifecycle> {
    log: DurableLog,
    cache: EntryCache<L>,
}

impl<L: EntryLifecycle> LogHandle<L> {
    /// `init`: creates a fresh log at `path` (spec §4.2 `create`) and an empty cache, returning
    /// the opaque handle the engine uses for every subsequent call.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DbidTooLong`] if `config.dbid` exceeds [`crate::header::DBID_LEN`],
    /// and [`EngineError::DurableLog`] if the log file cannot be created or its bootstrap header
    /// cannot be written.
    #[instrument(level = "debug", skip(path, lifecycle))]
    pub fn create(
        path: impl AsRef<Path>,
        config: &Config,
        snapshot_last_term: u64,
        snapshot_last_idx: u64,
        lifecycle: L,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let log = DurableLog::create(path, &config.dbid, snapshot_last_term, snapshot_last_idx, config.no_fsync)?;
        let cache = EntryCache::new(lifecycle);
        Ok(Self { inner: Mutex::new(Inner { log, cache }) })
    }

    /// `init` over an existing log: opens it, rebuilds the offset index via `load_entries`, and
    /// starts with an empty cache (the cache is never persisted; it is repopulated purely by
    /// subsequent `append`s, per spec §4.3's treatment of the cache as a pure performance layer).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DbidTooLong`] if `config.dbid` exceeds [`crate::header::DBID_LEN`],
    /// and [`EngineError::DurableLog`] if the log file cannot be opened or its header or entries
    /// fail to decode while the offset index is rebuilt.
    #[instrument(level = "debug", skip(path, lifecycle))]
    pub fn open(path: impl AsRef<Path>, config: &Config, lifecycle: L) -> Result<Self, EngineError> {
        config.validate()?;
        let mut log = DurableLog::open(path, config.no_fsync)?;
        log.load_entries(|_, _| Ok(()))?;
        let cache = EntryCache::new(lifecycle);
        Ok(Self { inner: Mutex::new(Inner { log, cache }) })
    }

    /// `reset`: re-establishes the snapshot boundary on the durable log, then drops and
    /// re-creates the cache (spec §4.4).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DurableLog`] if the durable log fails to truncate or rewrite its
    /// header for the new snapshot boundary.
    pub fn reset(&self, idx: LogIndex, term: u64, lifecycle: L) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        inner.log.reset(idx, term)?;
        inner.cache.free();
        inner.cache = EntryCache::new(lifecycle);
        Ok(())
    }

    /// `append`: durable `append` followed by cache `append(e, log.current_idx())`. The durable
    /// write happens first -- the cache is only updated once the entry is confirmed on stable
    /// storage, so a failed durable write never leaves a stale cache entry behind (spec §7).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DurableLog`] if the durable write or its sync fails, and
    /// [`EngineError::Cache`] if the cache rejects the append (only possible if the durable log's
    /// own index bookkeeping were ever inconsistent with the cache's expected next index).
    pub fn append(&self, entry: LogEntry) -> Result<LogIndex, EngineError> {
        let mut inner = self.inner.lock();
        inner.log.append(&entry)?;
        let idx = inner.log.current_idx();
        inner.cache.append(std::sync::Arc::new(entry), idx)?;
        Ok(idx)
    }

    /// `poll`: head-evicts the cache up to `first_idx`. Does not touch the durable log -- the
    /// durable log's first index only changes through `reset` (spec §4.4).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cache`] if `first_idx` is outside the cache's live range.
    pub fn poll(&self, first_idx: LogIndex) -> Result<u64, EngineError> {
        Ok(self.inner.lock().cache.delete_head(first_idx)?)
    }

    /// `pop`: tail-truncates the cache before truncating the durable log, so a partial failure
    /// can never leave stale cache references to entries the durable log has already discarded
    /// (spec §4.4 explicitly calls out this ordering).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DurableLog`] if `from_idx` is outside the durable log's live range,
    /// or if a read, truncate, or seek fails while removing the suffix.
    pub fn pop<F>(&self, from_idx: LogIndex, mut cb: F) -> Result<u64, EngineError>
    where
        F: FnMut(&LogEntry, LogIndex),
    {
        let mut inner = self.inner.lock();
        // The cache may not hold `from_idx` at all (e.g. it was already evicted by `poll`, or
        // never grew that far) -- that is not an error for `pop`, only for the cache's own
        // `delete_tail` in isolation, so a cache miss here is tolerated.
        let _ = inner.cache.delete_tail(from_idx);
        Ok(inner.log.delete_suffix(from_idx, |entry, idx| cb(entry, idx))?)
    }

    /// `get`: cache first, falling back to the durable log on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DurableLog`] if the durable log fails to seek to the recorded
    /// offset for `idx`.
    pub fn get(&self, idx: LogIndex) -> Result<Option<LogEntry>, EngineError> {
        let mut inner = self.inner.lock();
        if let Some(cached) = inner.cache.get(idx) {
            return Ok(Some((*cached).clone()));
        }
        Ok(inner.log.get(idx)?)
    }

    /// `get_batch`: fills up to `n` consecutive entries starting at `idx`, stopping at the first
    /// miss. Returns however many were actually filled.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DurableLog`] under the same conditions as [`Self::get`], for
    /// whichever entry in the requested range triggers it.
    pub fn get_batch(&self, idx: LogIndex, n: usize) -> Result<Vec<LogEntry>, EngineError> {
        let mut out = Vec::with_capacity(n);
        for offset in 0..n as u64 {
            match self.get(idx + offset)? {
                Some(entry) => out.push(entry),
                None => break,
            }
        }
        Ok(out)
    }

    pub fn first_idx(&self) -> LogIndex {
        self.inner.lock().log.first_idx()
    }

    pub fn current_idx(&self) -> LogIndex {
        self.inner.lock().log.current_idx()
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().log.count()
    }

    /// `free`: releases every cache-held reference. The durable log's file handles close on drop.
    pub fn free(&self) {
        self.inner.lock().cache.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CountingLifecycle;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn config(dbid: &str) -> Config {
        Config::new(dbid, true).unwrap()
    }

    fn entry(term: u64, id: u64, kind: u32, data: &str) -> LogEntry {
        LogEntry::new(term, id, kind, data.as_bytes().to_vec())
    }

    #[test]
    fn append_updates_both_layers_and_get_prefers_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raft.log");
        let handle =
            LogHandle::create(&path, &config("db0"), 5, 100, Arc::new(CountingLifecycle::default())).unwrap();

        let idx = handle.append(entry(5, 1, 0, "a")).unwrap();
        assert_eq!(idx, 101);
        assert_eq!(handle.current_idx(), 101);
        assert_eq!(handle.count(), 1);

        let got = handle.get(101).unwrap().unwrap();
        assert_eq!(got, entry(5, 1, 0, "a"));
    }

    #[test]
    fn get_falls_back_to_durable_log_on_cache_miss() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raft.log");
        let handle =
            LogHandle::create(&path, &config("db0"), 0, 0, Arc::new(CountingLifecycle::default())).unwrap();

        handle.append(entry(1, 1, 0, "a")).unwrap();
        handle.poll(2).unwrap(); // evict the cache entirely

        let got = handle.get(1).unwrap().unwrap();
        assert_eq!(got, entry(1, 1, 0, "a"));
    }

    #[test]
    fn pop_trims_cache_before_durable_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raft.log");
        let handle =
            LogHandle::create(&path, &config("db0"), 0, 0, Arc::new(CountingLifecycle::default())).unwrap();

        handle.append(entry(1, 1, 0, "a")).unwrap();
        handle.append(entry(1, 2, 0, "b")).unwrap();

        let mut popped = Vec::new();
        handle.pop(2, |e, idx| popped.push((idx, e.clone()))).unwrap();

        assert_eq!(popped, vec![(2, entry(1, 2, 0, "b"))]);
        assert_eq!(handle.current_idx(), 1);
        assert!(handle.get(2).unwrap().is_none());
    }

    #[test]
    fn get_batch_stops_at_first_miss() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raft.log");
        let handle =
            LogHandle::create(&path, &config("db0"), 0, 0, Arc::new(CountingLifecycle::default())).unwrap();

        handle.append(entry(1, 1, 0, "a")).unwrap();
        handle.append(entry(1, 2, 0, "b")).unwrap();

        let batch = handle.get_batch(1, 5).unwrap();
        assert_eq!(batch, vec![entry(1, 1, 0, "a"), entry(1, 2, 0, "b")]);
    }

    #[test]
    fn reset_drops_and_recreates_the_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raft.log");
        let handle =
            LogHandle::create(&path, &config("db0"), 0, 0, Arc::new(CountingLifecycle::default())).unwrap();

        handle.append(entry(1, 1, 0, "a")).unwrap();
        handle.reset(200, 7, Arc::new(CountingLifecycle::default())).unwrap();

        assert_eq!(handle.first_idx(), 200);
        assert_eq!(handle.current_idx(), 200);
        assert_eq!(handle.count(), 0);
        assert!(handle.get(1).unwrap().is_none());
    }
}
