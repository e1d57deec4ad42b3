//! Version Store - Revision chains beneath the keyspaces
//!
//! Each key maps to a chain of (sequence number, value-or-tombstone)
//! revisions. Visibility at a read boundary S is the revision with the
//! largest sequence number <= S. Keys within a namespace are ordered by
//! unsigned byte-lexicographic comparison, which is the natural order of
//! `Vec<u8>` in the skip list.

use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Commit sequence number; one per applied batch
pub type SeqNo = u64;

/// Numeric keyspace identity, stable for the life of the keyspace
pub type KeySpaceId = u32;

// ============================================================================
// Revisions
// ============================================================================

/// A single revision of a key. `value: None` is a tombstone.
#[derive(Debug, Clone)]
pub struct Revision {
    pub seq: SeqNo,
    pub value: Option<Vec<u8>>,
}

impl Revision {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Revisions of one key, ordered by strictly ascending sequence number
#[derive(Debug, Default)]
pub struct RevisionChain {
    revisions: Vec<Revision>,
}

impl RevisionChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a revision. Two operations on the same key within one batch
    /// share a sequence number; the later operation wins.
    pub fn push(&mut self, seq: SeqNo, value: Option<Vec<u8>>) {
        if let Some(last) = self.revisions.last_mut() {
            debug_assert!(last.seq <= seq, "sequence numbers must not regress");
            if last.seq == seq {
                last.value = value;
                return;
            }
        }
        self.revisions.push(Revision { seq, value });
    }

    /// The revision visible at `boundary`: largest seq <= boundary.
    /// Tombstones are returned; callers decide whether absence matters.
    pub fn visible_at(&self, boundary: SeqNo) -> Option<&Revision> {
        let idx = self.revisions.partition_point(|r| r.seq <= boundary);
        if idx == 0 {
            None
        } else {
            Some(&self.revisions[idx - 1])
        }
    }

    /// Newest revision regardless of boundary
    pub fn latest(&self) -> Option<&Revision> {
        self.revisions.last()
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Reclaim superseded revisions. `boundaries` is the sorted set of
    /// read boundaries that must stay readable (active snapshots plus the
    /// committed sequence number, which stands in for every future
    /// reader). A revision with a newer successor survives only while
    /// some boundary falls in its visibility interval
    /// `[rev.seq, successor.seq)`; the newest revision always survives.
    /// Returns how many were removed.
    pub fn gc(&mut self, boundaries: &[SeqNo]) -> usize {
        let len = self.revisions.len();
        if len <= 1 {
            return 0;
        }
        let mut keep = vec![true; len];
        for i in 0..len - 1 {
            let lo = self.revisions[i].seq;
            let hi = self.revisions[i + 1].seq;
            let idx = boundaries.partition_point(|b| *b < lo);
            keep[i] = boundaries.get(idx).is_some_and(|b| *b < hi);
        }
        let mut it = keep.iter();
        self.revisions.retain(|_| *it.next().unwrap());
        len - self.revisions.len()
    }

    /// Whether the whole chain is reclaimable: a lone tombstone reads as
    /// absence at every boundary, before or after its sequence number
    pub fn is_dead(&self) -> bool {
        self.revisions.len() == 1 && self.revisions[0].is_tombstone()
    }
}

// ============================================================================
// Namespace
// ============================================================================

/// Ordered key index of one keyspace
pub struct Namespace {
    entries: SkipMap<Vec<u8>, RwLock<RevisionChain>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self {
            entries: SkipMap::new(),
        }
    }

    /// Append a revision for `key` at `seq`
    pub fn apply(&self, key: Vec<u8>, seq: SeqNo, value: Option<Vec<u8>>) {
        let entry = self
            .entries
            .get_or_insert_with(key, || RwLock::new(RevisionChain::new()));
        entry.value().write().push(seq, value);
    }

    /// Value of `key` visible at `boundary`; `None` for absent or deleted
    pub fn get(&self, key: &[u8], boundary: SeqNo) -> Option<Vec<u8>> {
        let entry = self.entries.get(key)?;
        let chain = entry.value().read();
        chain.visible_at(boundary).and_then(|r| r.value.clone())
    }

    /// Sequence number of the newest revision of `key`, tombstones included
    pub fn latest_seq(&self, key: &[u8]) -> Option<SeqNo> {
        let entry = self.entries.get(key)?;
        let chain = entry.value().read();
        chain.latest().map(|r| r.seq)
    }

    /// Sequence number of the revision of `key` visible at `boundary`
    pub fn visible_seq(&self, key: &[u8], boundary: SeqNo) -> Option<SeqNo> {
        let entry = self.entries.get(key)?;
        let chain = entry.value().read();
        chain.visible_at(boundary).map(|r| r.seq)
    }

    /// First live (non-tombstone) entry at or after `from`, at `boundary`
    pub fn next_visible(&self, from: Bound<&[u8]>, boundary: SeqNo) -> Option<(Vec<u8>, Vec<u8>)> {
        let mut entry = match from {
            Bound::Unbounded => self.entries.front(),
            bound => self.entries.lower_bound(bound),
        };
        while let Some(e) = entry {
            {
                let chain = e.value().read();
                if let Some(rev) = chain.visible_at(boundary) {
                    if let Some(value) = &rev.value {
                        return Some((e.key().clone(), value.clone()));
                    }
                }
            }
            entry = e.next();
        }
        None
    }

    /// Last live entry at or before `from`, at `boundary`
    pub fn prev_visible(&self, from: Bound<&[u8]>, boundary: SeqNo) -> Option<(Vec<u8>, Vec<u8>)> {
        let mut entry = match from {
            Bound::Unbounded => self.entries.back(),
            bound => self.entries.upper_bound(bound),
        };
        while let Some(e) = entry {
            {
                let chain = e.value().read();
                if let Some(rev) = chain.visible_at(boundary) {
                    if let Some(value) = &rev.value {
                        return Some((e.key().clone(), value.clone()));
                    }
                }
            }
            entry = e.prev();
        }
        None
    }

    /// All keys with a live value at `boundary` (used when a keyspace is
    /// dropped and every live key gets a tombstone)
    pub fn live_keys_at(&self, boundary: SeqNo) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        for e in self.entries.iter() {
            let chain = e.value().read();
            if let Some(rev) = chain.visible_at(boundary) {
                if !rev.is_tombstone() {
                    keys.push(e.key().clone());
                }
            }
        }
        keys
    }

    /// Reclaim revisions invisible to every boundary; returns the number
    /// removed
    pub fn gc(&self, boundaries: &[SeqNo]) -> usize {
        let mut removed = 0;
        for e in self.entries.iter() {
            let mut chain = e.value().write();
            removed += chain.gc(boundaries);
            if chain.is_dead() {
                removed += chain.len();
                drop(chain);
                e.remove();
            }
        }
        removed
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Version Store
// ============================================================================

/// Revision storage for every keyspace in the engine
///
/// Thread-safe: the namespace map is behind an RwLock, chains carry their
/// own locks, and the skip lists handle concurrent traversal.
pub struct VersionStore {
    namespaces: RwLock<AHashMap<KeySpaceId, Arc<Namespace>>>,
    /// Total revision count across all namespaces (GC heuristics)
    total_revisions: AtomicU64,
}

impl VersionStore {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(AHashMap::new()),
            total_revisions: AtomicU64::new(0),
        }
    }

    /// Register the namespace for a newly created keyspace
    pub fn register(&self, id: KeySpaceId) -> Arc<Namespace> {
        let ns = Arc::new(Namespace::new());
        self.namespaces.write().insert(id, Arc::clone(&ns));
        ns
    }

    /// Remove a dropped keyspace's namespace from the map
    pub fn unregister(&self, id: KeySpaceId) {
        self.namespaces.write().remove(&id);
    }

    pub fn namespace(&self, id: KeySpaceId) -> Option<Arc<Namespace>> {
        self.namespaces.read().get(&id).cloned()
    }

    /// Append one revision and keep the global count current
    pub fn apply(&self, ns: &Namespace, key: Vec<u8>, seq: SeqNo, value: Option<Vec<u8>>) {
        ns.apply(key, seq, value);
        self.total_revisions.fetch_add(1, Ordering::Relaxed);
    }

    /// Reclaim superseded revisions across every namespace
    pub fn gc(&self, boundaries: &[SeqNo]) -> usize {
        let namespaces: Vec<Arc<Namespace>> = self.namespaces.read().values().cloned().collect();
        let mut removed = 0;
        for ns in namespaces {
            removed += ns.gc(boundaries);
        }
        self.total_revisions
            .fetch_sub(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn total_revisions(&self) -> u64 {
        self.total_revisions.load(Ordering::Relaxed)
    }
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_boundaries() {
        let mut chain = RevisionChain::new();
        chain.push(10, Some(b"v1".to_vec()));
        chain.push(20, Some(b"v2".to_vec()));
        chain.push(30, None);

        assert!(chain.visible_at(5).is_none());
        assert_eq!(chain.visible_at(10).unwrap().value.as_deref(), Some(&b"v1"[..]));
        assert_eq!(chain.visible_at(15).unwrap().value.as_deref(), Some(&b"v1"[..]));
        assert_eq!(chain.visible_at(20).unwrap().value.as_deref(), Some(&b"v2"[..]));
        assert!(chain.visible_at(30).unwrap().is_tombstone());
        assert!(chain.visible_at(99).unwrap().is_tombstone());
    }

    #[test]
    fn test_same_seq_last_wins() {
        let mut chain = RevisionChain::new();
        chain.push(7, Some(b"a".to_vec()));
        chain.push(7, Some(b"b".to_vec()));
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.visible_at(7).unwrap().value.as_deref(), Some(&b"b"[..]));
    }

    #[test]
    fn test_chain_gc_keeps_visible() {
        let mut chain = RevisionChain::new();
        chain.push(10, Some(b"v1".to_vec()));
        chain.push(20, Some(b"v2".to_vec()));
        chain.push(30, Some(b"v3".to_vec()));

        // A reader at 25 still needs v2; nobody needs v1.
        let removed = chain.gc(&[25, 30]);
        assert_eq!(removed, 1);
        assert_eq!(chain.visible_at(25).unwrap().value.as_deref(), Some(&b"v2"[..]));
        assert_eq!(chain.visible_at(99).unwrap().value.as_deref(), Some(&b"v3"[..]));
    }

    #[test]
    fn test_chain_gc_reclaims_uncovered_interval() {
        let mut chain = RevisionChain::new();
        chain.push(10, Some(b"v1".to_vec()));
        chain.push(20, Some(b"v2".to_vec()));
        chain.push(30, Some(b"v3".to_vec()));

        // Boundaries 10 and 30: v1's interval [10, 20) is covered, v2's
        // interval [20, 30) is not.
        let removed = chain.gc(&[10, 30]);
        assert_eq!(removed, 1);
        assert_eq!(chain.visible_at(10).unwrap().value.as_deref(), Some(&b"v1"[..]));
        assert_eq!(chain.visible_at(30).unwrap().value.as_deref(), Some(&b"v3"[..]));
    }

    #[test]
    fn test_dead_chain_detection() {
        let mut chain = RevisionChain::new();
        chain.push(10, Some(b"v".to_vec()));
        chain.push(20, None);
        chain.gc(&[50]);
        assert!(chain.is_dead());
    }

    #[test]
    fn test_namespace_ordering() {
        let ns = Namespace::new();
        ns.apply(b"b".to_vec(), 1, Some(b"2".to_vec()));
        ns.apply(b"a".to_vec(), 1, Some(b"1".to_vec()));
        ns.apply(b"c".to_vec(), 1, Some(b"3".to_vec()));

        let (k, _) = ns.next_visible(Bound::Unbounded, 1).unwrap();
        assert_eq!(k, b"a");
        let (k, _) = ns.next_visible(Bound::Excluded(&b"a"[..]), 1).unwrap();
        assert_eq!(k, b"b");
        let (k, _) = ns.prev_visible(Bound::Unbounded, 1).unwrap();
        assert_eq!(k, b"c");
    }

    #[test]
    fn test_namespace_skips_tombstones() {
        let ns = Namespace::new();
        ns.apply(b"a".to_vec(), 1, Some(b"1".to_vec()));
        ns.apply(b"b".to_vec(), 1, Some(b"2".to_vec()));
        ns.apply(b"b".to_vec(), 2, None);

        // At boundary 2 the tombstone hides "b"
        assert!(ns.next_visible(Bound::Excluded(&b"a"[..]), 2).is_none());
        // At boundary 1 "b" is still live
        let (k, _) = ns.next_visible(Bound::Excluded(&b"a"[..]), 1).unwrap();
        assert_eq!(k, b"b");
    }

    #[test]
    fn test_store_gc_counts() {
        let store = VersionStore::new();
        let ns = store.register(1);
        store.apply(&ns, b"k".to_vec(), 1, Some(b"v1".to_vec()));
        store.apply(&ns, b"k".to_vec(), 2, Some(b"v2".to_vec()));
        store.apply(&ns, b"k".to_vec(), 3, Some(b"v3".to_vec()));
        assert_eq!(store.total_revisions(), 3);

        let removed = store.gc(&[3]);
        assert_eq!(removed, 2);
        assert_eq!(store.total_revisions(), 1);
        assert_eq!(ns.get(b"k", 3).as_deref(), Some(&b"v3"[..]));
    }
}
