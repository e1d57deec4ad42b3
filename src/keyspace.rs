//! KeySpace - An independently namespaced ordered key-value domain
//!
//! A `KeySpace` is a cheap handle onto one column family of an engine.
//! Handles stay valid after the keyspace is dropped, but every operation
//! through them fails with `KeySpaceClosed` from that point on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::batch::WriteBatch;
use crate::engine::EngineInner;
use crate::iter::Iter;
use crate::mvcc::snapshot::Snapshot;
use crate::mvcc::store::{KeySpaceId, SeqNo};
use crate::{Result, StrataError};

/// Name of the keyspace that always exists
pub const DEFAULT_KEYSPACE: &str = "default";

// ============================================================================
// KeySpace state
// ============================================================================

/// Shared mutable state of one keyspace, referenced by every handle
pub(crate) struct KeySpaceState {
    pub(crate) id: KeySpaceId,
    pub(crate) name: String,
    dropped: AtomicBool,
}

impl KeySpaceState {
    pub(crate) fn new(id: KeySpaceId, name: String) -> Self {
        Self {
            id,
            name,
            dropped: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_dropped() {
            Err(StrataError::KeySpaceClosed(self.name.clone()))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// KeySpace handle
// ============================================================================

/// Public handle onto one keyspace
#[derive(Clone)]
pub struct KeySpace {
    pub(crate) state: Arc<KeySpaceState>,
    pub(crate) engine: Arc<EngineInner>,
}

impl KeySpace {
    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub(crate) fn id(&self) -> KeySpaceId {
        self.state.id
    }

    /// Store `value` under `key`
    pub fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<SeqNo> {
        let mut batch = WriteBatch::new();
        batch.put(self, key, value);
        self.engine.write(&batch)
    }

    /// Remove `key`
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<SeqNo> {
        let mut batch = WriteBatch::new();
        batch.delete(self, key);
        self.engine.write(&batch)
    }

    /// Combine `operand` with the current value via the configured merge
    /// operator
    pub fn merge(&self, key: impl AsRef<[u8]>, operand: impl AsRef<[u8]>) -> Result<SeqNo> {
        let mut batch = WriteBatch::new();
        batch.merge(self, key, operand);
        self.engine.write(&batch)
    }

    /// Read the current value of `key`; `None` means absent
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.engine.get(&self.state, key.as_ref(), None)
    }

    /// Read `key` as of a snapshot boundary
    pub fn get_at(&self, snapshot: &Snapshot, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.engine
            .get(&self.state, key.as_ref(), Some(snapshot.sequence()))
    }

    /// Iterator over the current committed state
    pub fn iter(&self) -> Result<Iter> {
        EngineInner::new_iter(&self.engine, &self.state, None)
    }

    /// Iterator pinned to a snapshot boundary
    pub fn iter_at(&self, snapshot: &Snapshot) -> Result<Iter> {
        EngineInner::new_iter(&self.engine, &self.state, Some(snapshot.clone()))
    }
}
