//! Iterator - Ordered bidirectional cursor over one keyspace
//!
//! An iterator bound to a snapshot observes a fixed boundary for its whole
//! lifetime. An unbound iterator re-reads the committed boundary on every
//! positioning call, so it tracks the current state step by step. Either
//! way the cursor repositions through the ordered index, which keeps it
//! valid across concurrent writes and garbage collection.

use std::ops::Bound;
use std::sync::Arc;
use std::time::Instant;

use crate::engine::EngineInner;
use crate::keyspace::KeySpaceState;
use crate::mvcc::snapshot::Snapshot;
use crate::mvcc::store::{Namespace, SeqNo};
use crate::stats::{Histogram, Ticker};
use crate::Result;

/// Cursor over the live entries of one keyspace
///
/// Positioning calls (`seek*`, `next`, `prev`) skip tombstones and
/// revisions newer than the read boundary. `key`/`value` return `None`
/// until a positioning call lands on an entry.
pub struct Iter {
    engine: Arc<EngineInner>,
    state: Arc<KeySpaceState>,
    ns: Arc<Namespace>,
    snapshot: Option<Snapshot>,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl Iter {
    pub(crate) fn new(
        engine: Arc<EngineInner>,
        state: Arc<KeySpaceState>,
        ns: Arc<Namespace>,
        snapshot: Option<Snapshot>,
    ) -> Self {
        Self {
            engine,
            state,
            ns,
            snapshot,
            current: None,
        }
    }

    fn boundary(&self) -> SeqNo {
        match &self.snapshot {
            Some(snap) => snap.sequence(),
            None => self.engine.committed(),
        }
    }

    fn check_usable(&self) -> Result<()> {
        self.engine.ensure_open()?;
        self.state.ensure_open()
    }

    fn settle(&mut self, found: Option<(Vec<u8>, Vec<u8>)>, found_ticker: Ticker) {
        if let Some((key, value)) = &found {
            let stats = self.engine.stats();
            stats.inc(found_ticker);
            stats.add(Ticker::IterBytesRead, (key.len() + value.len()) as u64);
        }
        self.current = found;
    }

    /// Position at the first entry of the keyspace
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.check_usable()?;
        let start = Instant::now();
        let found = self.ns.next_visible(Bound::Unbounded, self.boundary());
        let stats = self.engine.stats();
        stats.inc(Ticker::NumberDbSeek);
        stats.record_latency(Histogram::DbSeek, start.elapsed().as_micros() as u64);
        self.settle(found, Ticker::NumberDbSeekFound);
        Ok(())
    }

    /// Position at the last entry of the keyspace
    pub fn seek_to_last(&mut self) -> Result<()> {
        self.check_usable()?;
        let start = Instant::now();
        let found = self.ns.prev_visible(Bound::Unbounded, self.boundary());
        let stats = self.engine.stats();
        stats.inc(Ticker::NumberDbSeek);
        stats.record_latency(Histogram::DbSeek, start.elapsed().as_micros() as u64);
        self.settle(found, Ticker::NumberDbSeekFound);
        Ok(())
    }

    /// Position at the first entry with key >= `target`
    pub fn seek(&mut self, target: impl AsRef<[u8]>) -> Result<()> {
        self.check_usable()?;
        let start = Instant::now();
        let found = self
            .ns
            .next_visible(Bound::Included(target.as_ref()), self.boundary());
        let stats = self.engine.stats();
        stats.inc(Ticker::NumberDbSeek);
        stats.record_latency(Histogram::DbSeek, start.elapsed().as_micros() as u64);
        self.settle(found, Ticker::NumberDbSeekFound);
        Ok(())
    }

    /// Position at the last entry with key <= `target`
    pub fn seek_for_prev(&mut self, target: impl AsRef<[u8]>) -> Result<()> {
        self.check_usable()?;
        let start = Instant::now();
        let found = self
            .ns
            .prev_visible(Bound::Included(target.as_ref()), self.boundary());
        let stats = self.engine.stats();
        stats.inc(Ticker::NumberDbSeek);
        stats.record_latency(Histogram::DbSeek, start.elapsed().as_micros() as u64);
        self.settle(found, Ticker::NumberDbSeekFound);
        Ok(())
    }

    /// Advance to the next entry. No-op when not positioned.
    pub fn next(&mut self) -> Result<()> {
        self.check_usable()?;
        self.engine.stats().inc(Ticker::NumberDbNext);
        let found = match &self.current {
            Some((key, _)) => self
                .ns
                .next_visible(Bound::Excluded(key.as_slice()), self.boundary()),
            None => None,
        };
        self.settle(found, Ticker::NumberDbNextFound);
        Ok(())
    }

    /// Step back to the previous entry. No-op when not positioned.
    pub fn prev(&mut self) -> Result<()> {
        self.check_usable()?;
        self.engine.stats().inc(Ticker::NumberDbPrev);
        let found = match &self.current {
            Some((key, _)) => self
                .ns
                .prev_visible(Bound::Excluded(key.as_slice()), self.boundary()),
            None => None,
        };
        self.settle(found, Ticker::NumberDbPrevFound);
        Ok(())
    }

    /// Whether the cursor is positioned on an entry
    pub fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    /// Key at the current position
    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }

    /// Value at the current position
    pub fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| v.as_slice())
    }
}

impl Drop for Iter {
    fn drop(&mut self) {
        self.engine.iter_closed();
    }
}
