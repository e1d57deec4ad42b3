//! Garbage Collector - Reclaims revisions no snapshot can still see
//!
//! Runs opportunistically after commits, or on demand. A superseded
//! revision is reclaimable once no read boundary (active snapshot or the
//! committed sequence number, standing in for future readers) falls
//! inside its visibility interval; the newest revision of a key is never
//! touched.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::snapshot::SnapshotManager;
use super::store::{SeqNo, VersionStore};

// ============================================================================
// GC Configuration
// ============================================================================

/// Default interval between GC runs
const DEFAULT_GC_INTERVAL_SECS: u64 = 60;

/// Default minimum revision count before GC triggers
const DEFAULT_MIN_REVISIONS_FOR_GC: u64 = 1000;

/// GC configuration
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Minimum interval between opportunistic GC runs
    pub interval: Duration,
    /// Minimum total revision count before GC triggers
    pub min_revisions: u64,
    /// Whether opportunistic GC is enabled
    pub enabled: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_GC_INTERVAL_SECS),
            min_revisions: DEFAULT_MIN_REVISIONS_FOR_GC,
            enabled: true,
        }
    }
}

// ============================================================================
// GC Statistics
// ============================================================================

/// Statistics from a single GC run
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Number of revisions removed
    pub revisions_removed: usize,
    /// Duration of the run
    pub duration: Duration,
    /// Oldest read boundary protected by this run
    pub oldest_boundary: SeqNo,
}

// ============================================================================
// Garbage Collector
// ============================================================================

/// Garbage collector for the version store
///
/// Safety guarantee: never removes a revision that might still be visible
/// to any active snapshot. Callers serialize runs against writers (the
/// engine holds its commit lock while collecting).
pub struct GarbageCollector {
    config: GcConfig,
    /// Last run time, epoch millis
    last_run: AtomicU64,
    /// Whether a run is currently in progress
    running: AtomicBool,
    /// Total revisions removed across all runs
    total_removed: AtomicU64,
}

impl GarbageCollector {
    pub fn new(config: GcConfig) -> Self {
        Self {
            config,
            last_run: AtomicU64::new(0),
            running: AtomicBool::new(false),
            total_removed: AtomicU64::new(0),
        }
    }

    /// Whether an opportunistic run is due
    pub fn should_run(&self, store: &VersionStore) -> bool {
        if !self.config.enabled || self.running.load(Ordering::Relaxed) {
            return false;
        }
        if store.total_revisions() < self.config.min_revisions {
            return false;
        }
        let now = epoch_millis();
        let last = self.last_run.load(Ordering::Relaxed);
        now.saturating_sub(last) >= self.config.interval.as_millis() as u64
    }

    /// Run a collection. Returns None if another run is already in
    /// progress.
    pub fn run(
        &self,
        store: &VersionStore,
        snapshots: &SnapshotManager,
        committed: SeqNo,
    ) -> Option<GcStats> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        let start = Instant::now();
        // Every active snapshot boundary must stay readable; `committed`
        // stands in for every future reader. Boundaries never exceed the
        // committed sequence, so appending keeps the list sorted.
        let mut boundaries = snapshots.boundaries();
        boundaries.push(committed);
        let removed = store.gc(&boundaries);
        let duration = start.elapsed();

        self.total_removed.fetch_add(removed as u64, Ordering::Relaxed);
        self.last_run.store(epoch_millis(), Ordering::Relaxed);
        self.running.store(false, Ordering::SeqCst);

        let oldest_boundary = boundaries[0];
        tracing::debug!(
            oldest_boundary,
            removed,
            micros = duration.as_micros() as u64,
            "gc run complete"
        );

        Some(GcStats {
            revisions_removed: removed,
            duration,
            oldest_boundary,
        })
    }

    /// Run if the heuristics say it is worthwhile
    pub fn maybe_run(
        &self,
        store: &VersionStore,
        snapshots: &SnapshotManager,
        committed: SeqNo,
    ) -> Option<GcStats> {
        if self.should_run(store) {
            self.run(store, snapshots, committed)
        } else {
            None
        }
    }

    /// Total revisions removed across all runs
    pub fn total_removed(&self) -> u64 {
        self.total_removed.load(Ordering::Relaxed)
    }
}

fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn eager_config() -> GcConfig {
        GcConfig {
            interval: Duration::from_secs(0),
            min_revisions: 0,
            enabled: true,
        }
    }

    #[test]
    fn test_gc_removes_superseded() {
        let store = VersionStore::new();
        let snapshots = Arc::new(SnapshotManager::new());
        let gc = GarbageCollector::new(eager_config());

        let ns = store.register(1);
        store.apply(&ns, b"k".to_vec(), 1, Some(b"v1".to_vec()));
        store.apply(&ns, b"k".to_vec(), 2, Some(b"v2".to_vec()));
        store.apply(&ns, b"k".to_vec(), 3, Some(b"v3".to_vec()));

        let stats = gc.run(&store, &snapshots, 3).unwrap();
        assert_eq!(stats.revisions_removed, 2);
        assert_eq!(gc.total_removed(), 2);
    }

    #[test]
    fn test_gc_respects_active_snapshot() {
        let store = VersionStore::new();
        let snapshots = Arc::new(SnapshotManager::new());
        let gc = GarbageCollector::new(eager_config());

        let ns = store.register(1);
        store.apply(&ns, b"k".to_vec(), 1, Some(b"v1".to_vec()));
        let snap = SnapshotManager::acquire(&snapshots, 1);
        store.apply(&ns, b"k".to_vec(), 2, Some(b"v2".to_vec()));

        let stats = gc.run(&store, &snapshots, 2).unwrap();
        assert_eq!(stats.oldest_boundary, 1);
        assert_eq!(stats.revisions_removed, 0);
        assert_eq!(ns.get(b"k", snap.sequence()).as_deref(), Some(&b"v1"[..]));

        drop(snap);
        let stats = gc.run(&store, &snapshots, 2).unwrap();
        assert_eq!(stats.revisions_removed, 1);
    }

    #[test]
    fn test_gc_disabled() {
        let store = VersionStore::new();
        let gc = GarbageCollector::new(GcConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(!gc.should_run(&store));
    }
}
