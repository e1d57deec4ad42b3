//! Transaction - A session over a private write batch
//!
//! Writes stage into the transaction's own batch and are visible to its
//! reads (read-your-own-writes) but to nobody else before commit. Plain
//! reads never lock and never conflict; only `get_for_update` enters
//! conflict detection, with mode-specific behavior. Savepoints snapshot
//! the staging state and can unwind it, releasing locks taken since.
//!
//! State machine: `Open -> { Committed, RolledBack }`, both terminal.

use std::sync::Arc;
use std::time::Instant;

use super::lock::LockKey;
use super::manager::TxnId;
use crate::batch::{Op, WriteBatch};
use crate::engine::EngineInner;
use crate::keyspace::KeySpace;
use crate::mvcc::snapshot::Snapshot;
use crate::mvcc::store::{KeySpaceId, SeqNo};
use crate::stats::{Histogram, Ticker};
use crate::{Result, StrataError};

// ============================================================================
// Mode and state
// ============================================================================

/// Concurrency-control discipline of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    /// Lock at read time, fail fast on contention
    Pessimistic,
    /// Validate the read set at commit time
    Optimistic,
}

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Open,
    Committed,
    RolledBack,
}

/// One tracked `get_for_update` observation
#[derive(Debug, Clone)]
pub struct ReadRecord {
    pub keyspace: KeySpaceId,
    pub key: Vec<u8>,
    /// Sequence number of the revision observed; None when the key was
    /// absent
    pub seq_seen: Option<SeqNo>,
}

/// Staging positions captured by `set_save_point`
#[derive(Debug, Clone, Copy)]
struct SavePoint {
    batch_len: usize,
    locks_len: usize,
    reads_len: usize,
}

// ============================================================================
// Transaction
// ============================================================================

/// A transaction handle. Not `Sync`: one session drives it.
///
/// Dropping an open transaction is a caller error (a lock leak); the
/// engine rolls it back, warns, and counts it under `stratadb.txn.leaked`.
pub struct Transaction {
    id: TxnId,
    mode: TxnMode,
    engine: Arc<EngineInner>,
    batch: WriteBatch,
    read_set: Vec<ReadRecord>,
    /// Locks in acquisition order, so savepoints can release a suffix
    locked: Vec<LockKey>,
    save_points: Vec<SavePoint>,
    snapshot: Option<Snapshot>,
    state: TxnState,
}

impl Transaction {
    pub(crate) fn new(engine: Arc<EngineInner>, id: TxnId, mode: TxnMode) -> Self {
        Self {
            id,
            mode,
            engine,
            batch: WriteBatch::new(),
            read_set: Vec::new(),
            locked: Vec::new(),
            save_points: Vec::new(),
            snapshot: None,
            state: TxnState::Open,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state != TxnState::Open {
            return Err(StrataError::TransactionFinished);
        }
        self.engine.ensure_open()
    }

    /// Read boundary: the bound snapshot if any, else current committed
    fn boundary(&self) -> SeqNo {
        match &self.snapshot {
            Some(snap) => snap.sequence(),
            None => self.engine.committed(),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read `key`, seeing this transaction's own staged writes. Never
    /// locks and never participates in conflict detection.
    pub fn get(&self, ks: &KeySpace, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        ks.state.ensure_open()?;
        let value = self.read_own(ks.id(), key.as_ref(), self.boundary())?;
        let stats = self.engine.stats();
        stats.inc(Ticker::NumberKeysRead);
        match &value {
            Some(v) => {
                stats.inc(Ticker::NumberGetHit);
                stats.add(Ticker::BytesRead, (key.as_ref().len() + v.len()) as u64);
            }
            None => stats.inc(Ticker::NumberGetMiss),
        }
        Ok(value)
    }

    /// Read `key` and track it for conflict detection.
    ///
    /// Pessimistic mode takes the exclusive key lock (failing fast with
    /// `Conflict` if another transaction holds it); optimistic mode
    /// records the observed sequence number for commit-time validation.
    pub fn get_for_update(&mut self, ks: &KeySpace, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        ks.state.ensure_open()?;
        let key = key.as_ref();
        let keyspace = ks.id();

        if self.mode == TxnMode::Pessimistic {
            let newly = self
                .engine
                .txns()
                .lock_table()
                .try_acquire(self.id, keyspace, key)?;
            if newly {
                self.locked.push((keyspace, key.to_vec()));
            }
        }

        let boundary = self.boundary();
        let seq_seen = self
            .engine
            .store()
            .namespace(keyspace)
            .and_then(|ns| ns.visible_seq(key, boundary));
        self.read_set.push(ReadRecord {
            keyspace,
            key: key.to_vec(),
            seq_seen,
        });

        self.read_own(keyspace, key, boundary)
    }

    /// Committed view at `boundary` with this transaction's staged
    /// operations folded on top, in staging order
    fn read_own(&self, keyspace: KeySpaceId, key: &[u8], boundary: SeqNo) -> Result<Option<Vec<u8>>> {
        let ns = self
            .engine
            .store()
            .namespace(keyspace)
            .ok_or_else(|| StrataError::KeySpaceClosed(format!("id {}", keyspace)))?;
        let mut value = ns.get(key, boundary);

        for op in self.batch.ops() {
            if op.keyspace() != keyspace || op.key() != key {
                continue;
            }
            match op {
                Op::Put { value: v, .. } => value = Some(v.clone()),
                Op::Delete { .. } => value = None,
                Op::Merge { operand, .. } => {
                    // merge() refuses to stage without an operator
                    let operator = self.engine.merge_operator().expect("merge operator").as_ref();
                    value = match operator(key, value.as_deref(), operand) {
                        Some(merged) => Some(merged),
                        None => {
                            self.engine.stats().inc(Ticker::NumberMergeFailures);
                            Some(operand.clone())
                        }
                    };
                }
            }
        }
        Ok(value)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Stage a put, visible to this transaction's reads immediately
    pub fn put(&mut self, ks: &KeySpace, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.ensure_open()?;
        ks.state.ensure_open()?;
        self.batch.put(ks, key, value);
        Ok(())
    }

    /// Stage a delete
    pub fn delete(&mut self, ks: &KeySpace, key: impl AsRef<[u8]>) -> Result<()> {
        self.ensure_open()?;
        ks.state.ensure_open()?;
        self.batch.delete(ks, key);
        Ok(())
    }

    /// Stage a merge; fails unless the engine has a merge operator
    pub fn merge(&mut self, ks: &KeySpace, key: impl AsRef<[u8]>, operand: impl AsRef<[u8]>) -> Result<()> {
        self.ensure_open()?;
        ks.state.ensure_open()?;
        if self.engine.merge_operator().is_none() {
            return Err(StrataError::InvalidBatch(
                "merge requires a merge operator".to_string(),
            ));
        }
        self.batch.merge(ks, key, operand);
        Ok(())
    }

    // ========================================================================
    // Snapshot binding
    // ========================================================================

    /// Pin reads (including `get_for_update`) to the current committed
    /// boundary, giving repeatable-read semantics for the rest of the
    /// transaction
    pub fn set_snapshot(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.snapshot = Some(self.engine.snapshot()?);
        Ok(())
    }

    /// The snapshot bound by `set_snapshot`, if any
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    // ========================================================================
    // Savepoints
    // ========================================================================

    /// Push the current staging position onto the savepoint stack
    pub fn set_save_point(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.save_points.push(SavePoint {
            batch_len: self.batch.len(),
            locks_len: self.locked.len(),
            reads_len: self.read_set.len(),
        });
        Ok(())
    }

    /// Unwind to the most recent savepoint: discard operations staged
    /// since, release locks acquired since, and pop the savepoint
    pub fn rollback_to_save_point(&mut self) -> Result<()> {
        self.ensure_open()?;
        let sp = self
            .save_points
            .pop()
            .ok_or_else(|| StrataError::NotFound("no save point set".to_string()))?;

        self.batch.truncate(sp.batch_len);
        self.read_set.truncate(sp.reads_len);

        let released: Vec<LockKey> = self.locked.split_off(sp.locks_len);
        self.engine
            .txns()
            .lock_table()
            .release_all(self.id, &released);
        Ok(())
    }

    // ========================================================================
    // Commit / rollback
    // ========================================================================

    /// Validate (per mode) and atomically apply the staged batch.
    ///
    /// A `Conflict` rolls the transaction back before returning: retry
    /// means a fresh transaction. Other errors leave it open.
    pub fn commit(&mut self) -> Result<SeqNo> {
        self.ensure_open()?;
        let start = Instant::now();

        let result = self.engine.commit_transaction(
            self.id,
            self.mode,
            &self.batch,
            &self.read_set,
            &self.locked,
        );

        match result {
            Ok(seq) => {
                self.finish(TxnState::Committed);
                let stats = self.engine.stats();
                stats.inc(Ticker::TxnCommitted);
                stats.record_latency(Histogram::TxnCommit, start.elapsed().as_micros() as u64);
                Ok(seq)
            }
            Err(err @ StrataError::Conflict(_)) => {
                tracing::debug!(txn = self.id, %err, "commit conflict, rolling back");
                self.finish(TxnState::RolledBack);
                self.engine.stats().inc(Ticker::TxnConflicts);
                Err(err)
            }
            Err(other) => Err(other),
        }
    }

    /// Discard all staged writes, release all locks, terminal
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.finish(TxnState::RolledBack);
        self.engine.stats().inc(Ticker::TxnRolledBack);
        Ok(())
    }

    fn finish(&mut self, state: TxnState) {
        self.engine
            .txns()
            .lock_table()
            .release_all(self.id, &self.locked);
        self.locked.clear();
        self.batch.clear();
        self.state = state;
        self.engine.txns().finished();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxnState::Open {
            // Caller error: neither committed nor rolled back. Release the
            // locks so the engine is not wedged, but say so loudly.
            tracing::warn!(
                txn = self.id,
                staged_ops = self.batch.len(),
                held_locks = self.locked.len(),
                "transaction dropped while open; rolling back"
            );
            self.engine.stats().inc(Ticker::TxnLeaked);
            self.finish(TxnState::RolledBack);
        }
    }
}
