//! Engine - Top-level handle owning keyspaces, versions, and commits
//!
//! The engine is opened against a data directory and owns everything:
//! the version store, the keyspace registry, the global sequence counter,
//! snapshots, transactions, GC, and statistics. All mutation funnels
//! through `write`, which serializes on a single commit lock: exactly one
//! batch receives a sequence number and is applied at a time, giving a
//! total order over commits. Reads never take that lock; they read the
//! published `committed` boundary.
//!
//! There is no process-global state. Open returns a handle; everything
//! hangs off it, and `close` is an explicit, checked operation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;

use crate::batch::{Op, WriteBatch};
use crate::config::{MergeOperator, Options};
use crate::iter::Iter;
use crate::keyspace::{KeySpace, KeySpaceState, DEFAULT_KEYSPACE};
use crate::mvcc::gc::{GarbageCollector, GcStats};
use crate::mvcc::snapshot::{Snapshot, SnapshotManager};
use crate::mvcc::store::{KeySpaceId, SeqNo, VersionStore};
use crate::stats::{Histogram, Statistics, Ticker};
use crate::txn::manager::{TxnId, TxnManager};
use crate::txn::transaction::{ReadRecord, Transaction, TxnMode};
use crate::{Result, StrataError};

// ============================================================================
// Engine internals
// ============================================================================

pub(crate) struct EngineInner {
    path: PathBuf,
    opts: Options,
    store: VersionStore,
    /// Keyspaces by name; BTreeMap keeps list_keyspaces() ordered
    registry: RwLock<BTreeMap<String, Arc<KeySpaceState>>>,
    /// Keyspaces by id, for batch validation
    by_id: RwLock<AHashMap<KeySpaceId, Arc<KeySpaceState>>>,
    next_ks_id: AtomicU32,
    /// Highest fully-applied sequence number; the read boundary for
    /// unpinned reads. Advanced only under the commit lock, after every
    /// revision of the batch is in place.
    committed: AtomicU64,
    commit_lock: Mutex<()>,
    snapshots: Arc<SnapshotManager>,
    txns: TxnManager,
    gc: GarbageCollector,
    stats: Arc<Statistics>,
    closed: AtomicBool,
    open_iters: AtomicUsize,
}

impl EngineInner {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StrataError::EngineClosed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn committed(&self) -> SeqNo {
        self.committed.load(Ordering::Acquire)
    }

    pub(crate) fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub(crate) fn store(&self) -> &VersionStore {
        &self.store
    }

    pub(crate) fn txns(&self) -> &TxnManager {
        &self.txns
    }

    pub(crate) fn merge_operator(&self) -> Option<&MergeOperator> {
        self.opts.merge_operator.as_ref()
    }

    // ========================================================================
    // Commit path
    // ========================================================================

    /// Apply a batch under the commit lock
    pub(crate) fn write(&self, batch: &WriteBatch) -> Result<SeqNo> {
        let start = Instant::now();
        let seq = {
            let _guard = self.commit_lock.lock();
            self.apply_locked(batch, None)?
        };
        self.stats
            .record_latency(Histogram::DbWrite, start.elapsed().as_micros() as u64);
        self.maybe_gc();
        Ok(seq)
    }

    /// Validate and apply a batch. Caller holds the commit lock.
    ///
    /// All-or-nothing: every operation is validated (live keyspace, merge
    /// operator present, no foreign advisory lock) before any revision is
    /// written. `writer` identifies the committing transaction so its own
    /// locks do not count against it.
    fn apply_locked(&self, batch: &WriteBatch, writer: Option<TxnId>) -> Result<SeqNo> {
        self.ensure_open()?;
        let committed = self.committed.load(Ordering::Acquire);
        if batch.is_empty() {
            return Ok(committed);
        }

        let mut namespaces = Vec::with_capacity(batch.len());
        {
            let by_id = self.by_id.read();
            for op in batch.ops() {
                let live = by_id
                    .get(&op.keyspace())
                    .filter(|state| !state.is_dropped());
                let state = live.ok_or_else(|| {
                    StrataError::KeySpaceClosed(format!("id {}", op.keyspace()))
                })?;
                if matches!(op, Op::Merge { .. }) && self.opts.merge_operator.is_none() {
                    return Err(StrataError::InvalidBatch(
                        "merge requires a merge operator".to_string(),
                    ));
                }
                if let Some(holder) =
                    self.txns
                        .lock_table()
                        .blocks(op.keyspace(), op.key(), writer)
                {
                    return Err(StrataError::Conflict(format!(
                        "key in keyspace '{}' is locked by transaction {}",
                        state.name, holder
                    )));
                }
                let ns = self.store.namespace(op.keyspace()).ok_or_else(|| {
                    StrataError::KeySpaceClosed(state.name.clone())
                })?;
                namespaces.push(ns);
            }
        }

        let seq = committed + 1;
        let mut bytes = 0u64;
        for (op, ns) in batch.ops().iter().zip(namespaces.iter()) {
            bytes += op.byte_len() as u64;
            match op {
                Op::Put { key, value, .. } => {
                    self.store.apply(ns, key.clone(), seq, Some(value.clone()));
                }
                Op::Delete { key, .. } => {
                    self.store.apply(ns, key.clone(), seq, None);
                }
                Op::Merge { key, operand, .. } => {
                    // validated above
                    let operator =
                        self.opts.merge_operator.as_ref().expect("merge operator").as_ref();
                    // boundary `seq` folds in earlier ops of this batch
                    let prior = ns.get(key, seq);
                    let merged = match operator(key, prior.as_deref(), operand) {
                        Some(merged) => merged,
                        None => {
                            self.stats.inc(Ticker::NumberMergeFailures);
                            operand.clone()
                        }
                    };
                    self.store.apply(ns, key.clone(), seq, Some(merged));
                }
            }
        }
        self.committed.store(seq, Ordering::Release);

        self.stats.add(Ticker::NumberKeysWritten, batch.len() as u64);
        self.stats.add(Ticker::BytesWritten, bytes);
        Ok(seq)
    }

    /// Commit a transaction: mode-specific validation, then apply, all
    /// under the commit lock so validation and application are serialized
    /// against every other commit
    pub(crate) fn commit_transaction(
        &self,
        id: TxnId,
        mode: TxnMode,
        batch: &WriteBatch,
        reads: &[ReadRecord],
        locked: &[(KeySpaceId, Vec<u8>)],
    ) -> Result<SeqNo> {
        let _guard = self.commit_lock.lock();
        match mode {
            TxnMode::Pessimistic => self.txns.verify_locks(id, locked)?,
            TxnMode::Optimistic => self.txns.validate_reads(&self.store, reads)?,
        }
        self.apply_locked(batch, Some(id))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub(crate) fn get(
        &self,
        state: &Arc<KeySpaceState>,
        key: &[u8],
        boundary: Option<SeqNo>,
    ) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        state.ensure_open()?;
        let start = Instant::now();
        let ns = self
            .store
            .namespace(state.id)
            .ok_or_else(|| StrataError::KeySpaceClosed(state.name.clone()))?;
        let boundary = boundary.unwrap_or_else(|| self.committed());
        let value = ns.get(key, boundary);

        self.stats.inc(Ticker::NumberKeysRead);
        match &value {
            Some(v) => {
                self.stats.inc(Ticker::NumberGetHit);
                self.stats
                    .add(Ticker::BytesRead, (key.len() + v.len()) as u64);
            }
            None => self.stats.inc(Ticker::NumberGetMiss),
        }
        self.stats
            .record_latency(Histogram::DbGet, start.elapsed().as_micros() as u64);
        Ok(value)
    }

    pub(crate) fn new_iter(
        inner: &Arc<EngineInner>,
        state: &Arc<KeySpaceState>,
        snapshot: Option<Snapshot>,
    ) -> Result<Iter> {
        inner.ensure_open()?;
        state.ensure_open()?;
        let ns = inner
            .store
            .namespace(state.id)
            .ok_or_else(|| StrataError::KeySpaceClosed(state.name.clone()))?;
        inner.open_iters.fetch_add(1, Ordering::Relaxed);
        Ok(Iter::new(Arc::clone(inner), Arc::clone(state), ns, snapshot))
    }

    pub(crate) fn iter_closed(&self) {
        self.open_iters.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> Result<Snapshot> {
        self.ensure_open()?;
        let snap = SnapshotManager::acquire(&self.snapshots, self.committed());
        self.stats.inc(Ticker::SnapshotsCreated);
        Ok(snap)
    }

    // ========================================================================
    // Garbage collection
    // ========================================================================

    /// Opportunistic GC; heuristics gate the (commit-lock-serialized) run
    fn maybe_gc(&self) {
        if !self.gc.should_run(&self.store) {
            return;
        }
        let _guard = self.commit_lock.lock();
        let committed = self.committed.load(Ordering::Acquire);
        if let Some(run) = self.gc.run(&self.store, &self.snapshots, committed) {
            self.stats.inc(Ticker::GcRuns);
            self.stats
                .add(Ticker::GcRevisionsRemoved, run.revisions_removed as u64);
        }
    }

    fn run_gc(&self) -> Option<GcStats> {
        let _guard = self.commit_lock.lock();
        let committed = self.committed.load(Ordering::Acquire);
        let run = self.gc.run(&self.store, &self.snapshots, committed);
        if let Some(run) = &run {
            self.stats.inc(Ticker::GcRuns);
            self.stats
                .add(Ticker::GcRevisionsRemoved, run.revisions_removed as u64);
        }
        run
    }

    // ========================================================================
    // Keyspace registry
    // ========================================================================

    fn create_keyspace_state(&self, name: &str) -> Result<Arc<KeySpaceState>> {
        let mut registry = self.registry.write();
        if registry.contains_key(name) {
            return Err(StrataError::KeySpaceExists(name.to_string()));
        }
        let id = self.next_ks_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(KeySpaceState::new(id, name.to_string()));
        self.store.register(id);
        registry.insert(name.to_string(), Arc::clone(&state));
        self.by_id.write().insert(id, Arc::clone(&state));
        self.stats.inc(Ticker::KeySpacesCreated);
        tracing::info!(keyspace = name, id, "keyspace created");
        Ok(state)
    }

    fn drop_keyspace_inner(&self, name: &str) -> Result<()> {
        if name == DEFAULT_KEYSPACE {
            return Err(StrataError::CannotDropDefaultKeySpace);
        }
        let state = self
            .registry
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StrataError::NotFound(format!("keyspace '{}'", name)))?;

        {
            let _guard = self.commit_lock.lock();
            state.ensure_open()?;
            let ns = self
                .store
                .namespace(state.id)
                .ok_or_else(|| StrataError::KeySpaceClosed(state.name.clone()))?;

            // Tombstone every live key under one sequence number, then
            // close the namespace.
            let committed = self.committed.load(Ordering::Acquire);
            let live = ns.live_keys_at(committed);
            if !live.is_empty() {
                let seq = committed + 1;
                for key in live {
                    self.store.apply(&ns, key, seq, None);
                }
                self.committed.store(seq, Ordering::Release);
            }

            state.mark_dropped();
            self.registry.write().remove(name);
            self.by_id.write().remove(&state.id);
            self.store.unregister(state.id);
        }

        self.stats.inc(Ticker::KeySpacesDropped);
        tracing::info!(keyspace = name, "keyspace dropped");
        Ok(())
    }
}

// ============================================================================
// Engine handle
// ============================================================================

/// Shared handle onto one open engine
///
/// Cheap to clone; all clones refer to the same engine. The engine
/// synchronizes internally — callers need no external locking for
/// correctness, only for application-level ordering.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Open an engine against `path`, creating the directory when
    /// `create_if_missing` is set
    pub fn open(path: impl AsRef<Path>, opts: Options) -> Result<Engine> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            if opts.error_if_exists {
                return Err(StrataError::Io(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("{}: already exists and error_if_exists is set", path.display()),
                )));
            }
        } else if opts.create_if_missing {
            std::fs::create_dir_all(&path)?;
        } else {
            return Err(StrataError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}: does not exist and create_if_missing is unset", path.display()),
            )));
        }

        let gc = GarbageCollector::new(opts.gc.clone());
        let inner = Arc::new(EngineInner {
            path: path.clone(),
            opts,
            store: VersionStore::new(),
            registry: RwLock::new(BTreeMap::new()),
            by_id: RwLock::new(AHashMap::new()),
            next_ks_id: AtomicU32::new(0),
            committed: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
            snapshots: Arc::new(SnapshotManager::new()),
            txns: TxnManager::new(),
            gc,
            stats: Arc::new(Statistics::new()),
            closed: AtomicBool::new(false),
            open_iters: AtomicUsize::new(0),
        });
        inner.create_keyspace_state(DEFAULT_KEYSPACE)?;

        tracing::info!(path = %path.display(), "engine opened");
        Ok(Engine { inner })
    }

    /// Close the engine. Fails with `Busy` while any transaction or
    /// iterator is still open; afterwards every call fails `EngineClosed`.
    pub fn close(&self) -> Result<()> {
        self.inner.ensure_open()?;
        let transactions = self.inner.txns.active_count();
        let iterators = self.inner.open_iters.load(Ordering::Relaxed);
        if transactions > 0 || iterators > 0 {
            return Err(StrataError::Busy {
                transactions,
                iterators,
            });
        }
        self.inner.closed.store(true, Ordering::Release);
        tracing::info!(path = %self.inner.path.display(), "engine closed");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    // ========================================================================
    // Keyspace management
    // ========================================================================

    /// Create a keyspace; fails if the name is taken
    pub fn create_keyspace(&self, name: &str) -> Result<KeySpace> {
        self.inner.ensure_open()?;
        let state = self.inner.create_keyspace_state(name)?;
        Ok(KeySpace {
            state,
            engine: Arc::clone(&self.inner),
        })
    }

    /// Handle onto an existing keyspace
    pub fn keyspace(&self, name: &str) -> Result<KeySpace> {
        self.inner.ensure_open()?;
        let state = self
            .inner
            .registry
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StrataError::NotFound(format!("keyspace '{}'", name)))?;
        Ok(KeySpace {
            state,
            engine: Arc::clone(&self.inner),
        })
    }

    /// The keyspace that always exists
    pub fn default_keyspace(&self) -> Result<KeySpace> {
        self.keyspace(DEFAULT_KEYSPACE)
    }

    /// Names of all live keyspaces, sorted
    pub fn list_keyspaces(&self) -> Result<Vec<String>> {
        self.inner.ensure_open()?;
        Ok(self.inner.registry.read().keys().cloned().collect())
    }

    /// Drop a keyspace: tombstone every live key under one sequence
    /// number and close the namespace. Stale handles fail from then on.
    pub fn drop_keyspace(&self, name: &str) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.drop_keyspace_inner(name)
    }

    // ========================================================================
    // Direct operations (default keyspace)
    // ========================================================================

    pub fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<SeqNo> {
        self.default_keyspace()?.put(key, value)
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.default_keyspace()?.get(key)
    }

    /// Read as of a snapshot boundary
    pub fn get_at(&self, snapshot: &Snapshot, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.default_keyspace()?.get_at(snapshot, key)
    }

    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<SeqNo> {
        self.default_keyspace()?.delete(key)
    }

    pub fn merge(&self, key: impl AsRef<[u8]>, operand: impl AsRef<[u8]>) -> Result<SeqNo> {
        self.default_keyspace()?.merge(key, operand)
    }

    // ========================================================================
    // Batches, snapshots, transactions
    // ========================================================================

    /// Atomically apply a batch; returns the sequence number it became
    /// visible under
    pub fn write(&self, batch: &WriteBatch) -> Result<SeqNo> {
        self.inner.write(batch)
    }

    /// Take a snapshot of the current committed state
    pub fn snapshot(&self) -> Result<Snapshot> {
        self.inner.snapshot()
    }

    /// Begin a transaction in the given concurrency-control mode
    pub fn begin_transaction(&self, mode: TxnMode) -> Result<Transaction> {
        self.inner.ensure_open()?;
        let id = self.inner.txns.begin();
        self.inner.stats.inc(Ticker::TxnBegun);
        Ok(Transaction::new(Arc::clone(&self.inner), id, mode))
    }

    // ========================================================================
    // Statistics and maintenance
    // ========================================================================

    /// The engine's statistics registry, pollable by exporters
    pub fn statistics(&self) -> Arc<Statistics> {
        Arc::clone(&self.inner.stats)
    }

    /// Force a garbage-collection run
    pub fn run_gc(&self) -> Result<Option<GcStats>> {
        self.inner.ensure_open()?;
        Ok(self.inner.run_gc())
    }

    /// Current committed sequence number
    pub fn sequence(&self) -> SeqNo {
        self.inner.committed()
    }
}

// ============================================================================
// Tests
// ============================================================================
