//! Engine Statistics - Named counters and latency histograms
//!
//! Every engine owns one `Statistics` instance; there is no process-wide
//! state. Counters are monotonic for the lifetime of the engine and carry
//! stable dotted names so an external metrics exporter can poll them and
//! republish under its own naming scheme. Hot-path updates are single
//! atomic increments on cache-line-aligned counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// Aligned counter
// ============================================================================

/// Counter padded to a cache line to avoid false sharing between
/// adjacent hot counters
#[repr(align(64))]
struct AlignedCounter(AtomicU64);

impl AlignedCounter {
    fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    #[inline]
    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Tickers
// ============================================================================

/// Monotonic event counters exposed by the engine.
///
/// The numeric discriminants index into the counter array; the dotted
/// names are the stable public identity reported to exporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ticker {
    NumberKeysWritten,
    NumberKeysRead,
    BytesWritten,
    BytesRead,
    NumberGetHit,
    NumberGetMiss,
    NumberDbSeek,
    NumberDbNext,
    NumberDbPrev,
    NumberDbSeekFound,
    NumberDbNextFound,
    NumberDbPrevFound,
    IterBytesRead,
    NumberMergeFailures,
    SnapshotsCreated,
    TxnBegun,
    TxnCommitted,
    TxnConflicts,
    TxnRolledBack,
    TxnLeaked,
    KeySpacesCreated,
    KeySpacesDropped,
    GcRuns,
    GcRevisionsRemoved,
}

impl Ticker {
    pub const ALL: [Ticker; 24] = [
        Ticker::NumberKeysWritten,
        Ticker::NumberKeysRead,
        Ticker::BytesWritten,
        Ticker::BytesRead,
        Ticker::NumberGetHit,
        Ticker::NumberGetMiss,
        Ticker::NumberDbSeek,
        Ticker::NumberDbNext,
        Ticker::NumberDbPrev,
        Ticker::NumberDbSeekFound,
        Ticker::NumberDbNextFound,
        Ticker::NumberDbPrevFound,
        Ticker::IterBytesRead,
        Ticker::NumberMergeFailures,
        Ticker::SnapshotsCreated,
        Ticker::TxnBegun,
        Ticker::TxnCommitted,
        Ticker::TxnConflicts,
        Ticker::TxnRolledBack,
        Ticker::TxnLeaked,
        Ticker::KeySpacesCreated,
        Ticker::KeySpacesDropped,
        Ticker::GcRuns,
        Ticker::GcRevisionsRemoved,
    ];

    /// Stable exporter-facing name
    pub fn name(self) -> &'static str {
        match self {
            Ticker::NumberKeysWritten => "stratadb.number.keys.written",
            Ticker::NumberKeysRead => "stratadb.number.keys.read",
            Ticker::BytesWritten => "stratadb.bytes.written",
            Ticker::BytesRead => "stratadb.bytes.read",
            Ticker::NumberGetHit => "stratadb.number.get.hit",
            Ticker::NumberGetMiss => "stratadb.number.get.miss",
            Ticker::NumberDbSeek => "stratadb.number.db.seek",
            Ticker::NumberDbNext => "stratadb.number.db.next",
            Ticker::NumberDbPrev => "stratadb.number.db.prev",
            Ticker::NumberDbSeekFound => "stratadb.number.db.seek.found",
            Ticker::NumberDbNextFound => "stratadb.number.db.next.found",
            Ticker::NumberDbPrevFound => "stratadb.number.db.prev.found",
            Ticker::IterBytesRead => "stratadb.db.iter.bytes.read",
            Ticker::NumberMergeFailures => "stratadb.number.merge.failures",
            Ticker::SnapshotsCreated => "stratadb.snapshots.created",
            Ticker::TxnBegun => "stratadb.txn.begun",
            Ticker::TxnCommitted => "stratadb.txn.committed",
            Ticker::TxnConflicts => "stratadb.txn.conflicts",
            Ticker::TxnRolledBack => "stratadb.txn.rolledback",
            Ticker::TxnLeaked => "stratadb.txn.leaked",
            Ticker::KeySpacesCreated => "stratadb.keyspaces.created",
            Ticker::KeySpacesDropped => "stratadb.keyspaces.dropped",
            Ticker::GcRuns => "stratadb.gc.runs",
            Ticker::GcRevisionsRemoved => "stratadb.gc.revisions.removed",
        }
    }

    /// Help text for exporters
    pub fn help(self) -> &'static str {
        match self {
            Ticker::NumberKeysWritten => "Number of keys written",
            Ticker::NumberKeysRead => "Number of keys read",
            Ticker::BytesWritten => "Bytes written (keys plus values)",
            Ticker::BytesRead => "Bytes read by point lookups",
            Ticker::NumberGetHit => "Point lookups that found a live value",
            Ticker::NumberGetMiss => "Point lookups that found nothing",
            Ticker::NumberDbSeek => "Iterator seek calls",
            Ticker::NumberDbNext => "Iterator next calls",
            Ticker::NumberDbPrev => "Iterator prev calls",
            Ticker::NumberDbSeekFound => "Iterator seeks landing on a valid entry",
            Ticker::NumberDbNextFound => "Iterator next calls landing on a valid entry",
            Ticker::NumberDbPrevFound => "Iterator prev calls landing on a valid entry",
            Ticker::IterBytesRead => "Bytes read through iterators",
            Ticker::NumberMergeFailures => "Merge operator invocations that failed",
            Ticker::SnapshotsCreated => "Snapshots created",
            Ticker::TxnBegun => "Transactions begun",
            Ticker::TxnCommitted => "Transactions committed",
            Ticker::TxnConflicts => "Transaction commits failed on conflict",
            Ticker::TxnRolledBack => "Transactions rolled back",
            Ticker::TxnLeaked => "Transactions dropped while still open",
            Ticker::KeySpacesCreated => "Keyspaces created",
            Ticker::KeySpacesDropped => "Keyspaces dropped",
            Ticker::GcRuns => "Garbage-collection runs",
            Ticker::GcRevisionsRemoved => "Revisions reclaimed by garbage collection",
        }
    }
}

// ============================================================================
// Histograms
// ============================================================================

/// Latency histograms exposed by the engine, recorded in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Histogram {
    DbGet,
    DbWrite,
    DbSeek,
    TxnCommit,
}

impl Histogram {
    pub const ALL: [Histogram; 4] = [
        Histogram::DbGet,
        Histogram::DbWrite,
        Histogram::DbSeek,
        Histogram::TxnCommit,
    ];

    /// Stable exporter-facing name
    pub fn name(self) -> &'static str {
        match self {
            Histogram::DbGet => "stratadb.db.get.micros",
            Histogram::DbWrite => "stratadb.db.write.micros",
            Histogram::DbSeek => "stratadb.db.seek.micros",
            Histogram::TxnCommit => "stratadb.txn.commit.micros",
        }
    }
}

/// Point-in-time summary of one latency histogram
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistogramData {
    pub count: u64,
    pub sum: u64,
    pub average: f64,
    pub median: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: u64,
}

/// Power-of-two bucket count; covers up to ~2^43 microseconds
const LATENCY_BUCKETS: usize = 44;

/// Lock-free histogram over power-of-two microsecond buckets.
///
/// Bucket `i` (i >= 1) covers `[2^(i-1), 2^i)`; bucket 0 holds zeros.
/// Percentiles are estimated from bucket midpoints, which is plenty for
/// latency reporting.
struct LatencyHistogram {
    buckets: [AtomicU64; LATENCY_BUCKETS],
    count: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    #[inline]
    fn bucket_of(micros: u64) -> usize {
        let idx = (64 - micros.leading_zeros()) as usize;
        idx.min(LATENCY_BUCKETS - 1)
    }

    fn record(&self, micros: u64) {
        self.buckets[Self::bucket_of(micros)].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(micros, Ordering::Relaxed);
        self.max.fetch_max(micros, Ordering::Relaxed);
    }

    /// Estimate the value at quantile `q` in [0, 1]
    fn quantile(&self, q: f64) -> f64 {
        let total = self.count.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let target = (q * total as f64).ceil() as u64;
        let mut seen = 0u64;
        for (i, bucket) in self.buckets.iter().enumerate() {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= target {
                if i == 0 {
                    return 0.0;
                }
                // midpoint of [2^(i-1), 2^i)
                let lo = 1u64 << (i - 1);
                return (lo + lo / 2) as f64 + 0.5 * (lo & 1) as f64;
            }
        }
        self.max.load(Ordering::Relaxed) as f64
    }

    fn data(&self) -> HistogramData {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        HistogramData {
            count,
            sum,
            average: if count == 0 { 0.0 } else { sum as f64 / count as f64 },
            median: self.quantile(0.50),
            p95: self.quantile(0.95),
            p99: self.quantile(0.99),
            max: self.max.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Per-engine statistics registry
///
/// Thread-safe; all recording is lock-free.
pub struct Statistics {
    tickers: [AlignedCounter; Ticker::ALL.len()],
    histograms: [LatencyHistogram; Histogram::ALL.len()],
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            tickers: std::array::from_fn(|_| AlignedCounter::new()),
            histograms: std::array::from_fn(|_| LatencyHistogram::new()),
        }
    }

    /// Increment a ticker by one
    #[inline]
    pub fn inc(&self, ticker: Ticker) {
        self.tickers[ticker as usize].add(1);
    }

    /// Add `n` to a ticker
    #[inline]
    pub fn add(&self, ticker: Ticker, n: u64) {
        self.tickers[ticker as usize].add(n);
    }

    /// Current value of a ticker
    pub fn ticker(&self, ticker: Ticker) -> u64 {
        self.tickers[ticker as usize].get()
    }

    /// Record one latency observation in microseconds
    #[inline]
    pub fn record_latency(&self, histogram: Histogram, micros: u64) {
        self.histograms[histogram as usize].record(micros);
    }

    /// Summary of one histogram
    pub fn histogram_data(&self, histogram: Histogram) -> HistogramData {
        self.histograms[histogram as usize].data()
    }

    /// Serializable point-in-time copy of every counter and histogram
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            tickers: Ticker::ALL
                .iter()
                .map(|t| (t.name(), self.ticker(*t)))
                .collect(),
            histograms: Histogram::ALL
                .iter()
                .map(|h| (h.name(), self.histogram_data(*h)))
                .collect(),
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in Ticker::ALL {
            writeln!(f, "{} COUNT : {}", t.name(), self.ticker(t))?;
        }
        for h in Histogram::ALL {
            let d = self.histogram_data(h);
            writeln!(
                f,
                "{} P50 : {:.2} P95 : {:.2} P99 : {:.2} MAX : {} COUNT : {} SUM : {}",
                h.name(),
                d.median,
                d.p95,
                d.p99,
                d.max,
                d.count,
                d.sum
            )?;
        }
        Ok(())
    }
}

/// Snapshot of all statistics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsSnapshot {
    pub tickers: Vec<(&'static str, u64)>,
    pub histograms: Vec<(&'static str, HistogramData)>,
}

// ============================================================================
// Tests
// ============================================================================
