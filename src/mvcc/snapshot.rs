//! Snapshot Manager - Refcounted read boundaries
//!
//! A snapshot pins a sequence-number boundary; reads through it see only
//! revisions committed at or before that boundary. The manager tracks how
//! many outstanding handles reference each boundary so garbage collection
//! never reclaims a revision a snapshot can still see. Handles release
//! their boundary when the last clone drops, on every exit path.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::store::SeqNo;

// ============================================================================
// Snapshot Manager
// ============================================================================

/// Tracks active snapshot boundaries across the engine
///
/// Thread-safe; a BTreeMap keyed by boundary makes the oldest active
/// boundary a first-key lookup.
pub struct SnapshotManager {
    active: Mutex<BTreeMap<SeqNo, usize>>,
}

impl SnapshotManager {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register a new snapshot at `boundary`
    pub fn acquire(manager: &Arc<SnapshotManager>, boundary: SeqNo) -> Snapshot {
        *manager.active.lock().entry(boundary).or_insert(0) += 1;
        Snapshot {
            inner: Arc::new(SnapshotInner {
                boundary,
                manager: Arc::clone(manager),
            }),
        }
    }

    fn release(&self, boundary: SeqNo) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&boundary) {
            *count -= 1;
            if *count == 0 {
                active.remove(&boundary);
            }
        }
    }

    /// Oldest boundary still referenced, or None when no snapshot is live
    pub fn oldest_active(&self) -> Option<SeqNo> {
        self.active.lock().keys().next().copied()
    }

    /// All distinct active boundaries, ascending (GC input)
    pub fn boundaries(&self) -> Vec<SeqNo> {
        self.active.lock().keys().copied().collect()
    }

    /// Number of outstanding snapshot handles
    pub fn active_count(&self) -> usize {
        self.active.lock().values().sum()
    }
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Snapshot
// ============================================================================

struct SnapshotInner {
    boundary: SeqNo,
    manager: Arc<SnapshotManager>,
}

impl Drop for SnapshotInner {
    fn drop(&mut self) {
        self.manager.release(self.boundary);
    }
}

/// An immutable point-in-time read boundary
///
/// Cheap to clone; the boundary stays registered until the last clone is
/// dropped.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

impl Snapshot {
    /// The pinned sequence-number boundary
    pub fn sequence(&self) -> SeqNo {
        self.inner.boundary
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("sequence", &self.inner.boundary)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
