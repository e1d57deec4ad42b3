//! Lock Table - Exclusive advisory per-key locks
//!
//! Pessimistic transactions lock keys through `get_for_update`. Locks are
//! exclusive, re-entrant within the owning transaction, and held for the
//! transaction's lifetime. Acquisition never blocks: a key held by
//! another transaction fails immediately with a conflict. There is no
//! waiting, so there is nothing to deadlock on — long-lived locks can
//! starve other transactions, which is the documented trade-off.

use ahash::AHashMap;
use parking_lot::Mutex;

use super::manager::TxnId;
use crate::mvcc::store::KeySpaceId;
use crate::{Result, StrataError};

pub(crate) type LockKey = (KeySpaceId, Vec<u8>);

/// Engine-wide table of advisory key locks
///
/// Thread-safe; one flat mutex is enough because lock traffic is a few
/// map operations per `get_for_update`, never held across user code.
pub struct LockTable {
    locks: Mutex<AHashMap<LockKey, TxnId>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(AHashMap::new()),
        }
    }

    /// Acquire the lock on (keyspace, key) for `txn`.
    ///
    /// Returns `Ok(true)` when newly acquired, `Ok(false)` when `txn`
    /// already holds it, and a `Conflict` error when another transaction
    /// does.
    pub fn try_acquire(&self, txn: TxnId, keyspace: KeySpaceId, key: &[u8]) -> Result<bool> {
        let mut locks = self.locks.lock();
        match locks.get(&(keyspace, key.to_vec())) {
            Some(&holder) if holder == txn => Ok(false),
            Some(&holder) => Err(StrataError::Conflict(format!(
                "key is locked by transaction {}",
                holder
            ))),
            None => {
                locks.insert((keyspace, key.to_vec()), txn);
                Ok(true)
            }
        }
    }

    /// The transaction currently holding (keyspace, key), if any
    pub fn holder(&self, keyspace: KeySpaceId, key: &[u8]) -> Option<TxnId> {
        self.locks.lock().get(&(keyspace, key.to_vec())).copied()
    }

    /// Whether a write to (keyspace, key) by `writer` would hit someone
    /// else's lock. `writer` is `None` for direct (non-transactional)
    /// writes.
    pub fn blocks(&self, keyspace: KeySpaceId, key: &[u8], writer: Option<TxnId>) -> Option<TxnId> {
        let holder = self.holder(keyspace, key)?;
        if writer == Some(holder) {
            None
        } else {
            Some(holder)
        }
    }

    /// Release one lock if `txn` holds it
    pub fn release(&self, txn: TxnId, keyspace: KeySpaceId, key: &[u8]) {
        let mut locks = self.locks.lock();
        if locks.get(&(keyspace, key.to_vec())) == Some(&txn) {
            locks.remove(&(keyspace, key.to_vec()));
        }
    }

    /// Release every lock in `held` that `txn` still owns
    pub fn release_all(&self, txn: TxnId, held: &[LockKey]) {
        let mut locks = self.locks.lock();
        for (keyspace, key) in held {
            if locks.get(&(*keyspace, key.clone())) == Some(&txn) {
                locks.remove(&(*keyspace, key.clone()));
            }
        }
    }

    /// Number of locks currently held
    pub fn held_count(&self) -> usize {
        self.locks.lock().len()
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
