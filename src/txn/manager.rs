//! Transaction Manager - IDs, lock table, and commit-time validation
//!
//! The manager owns what is shared between transactions: the id counter
//! and the lock table. Per-transaction state lives in the `Transaction`
//! handle itself; the engine calls back into the manager on the commit
//! path, under its commit lock, so validation and application are
//! serialized against every other commit.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::lock::LockTable;
use super::transaction::ReadRecord;
use crate::mvcc::store::VersionStore;
use crate::{Result, StrataError};

/// Unique transaction identifier
pub type TxnId = u64;

/// Shared transaction bookkeeping for one engine
pub struct TxnManager {
    lock_table: LockTable,
    next_txn_id: AtomicU64,
    /// Transactions begun and not yet committed or rolled back
    active: AtomicUsize,
}

impl TxnManager {
    pub fn new() -> Self {
        Self {
            lock_table: LockTable::new(),
            next_txn_id: AtomicU64::new(1),
            active: AtomicUsize::new(0),
        }
    }

    pub fn lock_table(&self) -> &LockTable {
        &self.lock_table
    }

    /// Allocate an id for a new transaction
    pub fn begin(&self) -> TxnId {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// A transaction reached a terminal state
    pub fn finished(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Number of transactions still open
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Optimistic validation: every tracked read must still observe the
    /// same newest sequence number. Caller holds the commit lock.
    pub fn validate_reads(&self, store: &VersionStore, reads: &[ReadRecord]) -> Result<()> {
        for read in reads {
            let current = store
                .namespace(read.keyspace)
                .and_then(|ns| ns.latest_seq(&read.key));
            if current != read.seq_seen {
                return Err(StrataError::Conflict(format!(
                    "key was modified after it was read (seen seq {:?}, now {:?})",
                    read.seq_seen, current
                )));
            }
        }
        Ok(())
    }

    /// Pessimistic verification: every lock in `held` must still belong
    /// to `txn`. True by construction, checked anyway before the batch is
    /// applied. Caller holds the commit lock.
    pub fn verify_locks(&self, txn: TxnId, held: &[super::lock::LockKey]) -> Result<()> {
        for (keyspace, key) in held {
            if self.lock_table.holder(*keyspace, key) != Some(txn) {
                return Err(StrataError::Conflict(
                    "lock no longer held at commit".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for TxnManager {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
