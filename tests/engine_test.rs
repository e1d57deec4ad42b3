//! Engine-level integration tests: direct operations, batches,
//! snapshots, iterators, and keyspace lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use stratadb::{Engine, Options, StrataError, Ticker, TxnMode, WriteBatch};
use tempfile::tempdir;

fn open_engine() -> (tempfile::TempDir, Engine) {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path().join("db"), Options::default()).unwrap();
    (dir, engine)
}

/// Fill the default keyspace with the multiplication-table keys
/// "1x1".."9x9" mapped to their products
fn fill_table(engine: &Engine, max: u32) {
    for i in 1..=max {
        for j in 1..=max {
            engine
                .put(format!("{}x{}", i, j), format!("{}", i * j))
                .unwrap();
        }
    }
}

#[test]
fn iterator_forward_order_is_byte_lexicographic() {
    let (_dir, engine) = open_engine();
    fill_table(&engine, 9);

    let ks = engine.default_keyspace().unwrap();
    let mut iter = ks.iter().unwrap();
    let mut keys = Vec::new();
    iter.seek_to_first().unwrap();
    while iter.is_valid() {
        keys.push(String::from_utf8(iter.key().unwrap().to_vec()).unwrap());
        iter.next().unwrap();
    }

    assert_eq!(keys.len(), 81);
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    assert_eq!(keys.first().unwrap(), "1x1");
    assert_eq!(keys.last().unwrap(), "9x9");
}

#[test]
fn iterator_reverse_is_exact_mirror() {
    let (_dir, engine) = open_engine();
    fill_table(&engine, 9);

    let ks = engine.default_keyspace().unwrap();

    let mut forward = Vec::new();
    let mut iter = ks.iter().unwrap();
    iter.seek_to_first().unwrap();
    while iter.is_valid() {
        forward.push(iter.key().unwrap().to_vec());
        iter.next().unwrap();
    }

    let mut backward = Vec::new();
    let mut iter = ks.iter().unwrap();
    iter.seek_to_last().unwrap();
    while iter.is_valid() {
        backward.push(iter.key().unwrap().to_vec());
        iter.prev().unwrap();
    }

    backward.reverse();
    assert_eq!(forward, backward);
}

#[test]
fn range_forward_exactly_eight() {
    let (_dir, engine) = open_engine();
    for i in 1..=9u32 {
        engine.put(format!("{}", i), b"x").unwrap();
    }

    // Process range [start, limit): seek("8"), step while key < "9"
    let ks = engine.default_keyspace().unwrap();
    let mut iter = ks.iter().unwrap();
    let mut seen = Vec::new();
    iter.seek(b"8").unwrap();
    while iter.is_valid() && iter.key().unwrap() < b"9".as_slice() {
        seen.push(iter.key().unwrap().to_vec());
        iter.next().unwrap();
    }
    assert_eq!(seen, vec![b"8".to_vec()]);
}

#[test]
fn range_reverse_exactly_eight() {
    let (_dir, engine) = open_engine();
    for i in 1..=9u32 {
        engine.put(format!("{}", i), b"x").unwrap();
    }

    // Process range (limit, start] in reverse: seek_for_prev("8"),
    // step while key > "7". The bound is strict: "7" itself terminates.
    let ks = engine.default_keyspace().unwrap();
    let mut iter = ks.iter().unwrap();
    let mut seen = Vec::new();
    iter.seek_for_prev(b"8").unwrap();
    while iter.is_valid() && iter.key().unwrap() > b"7".as_slice() {
        seen.push(iter.key().unwrap().to_vec());
        iter.prev().unwrap();
    }
    assert_eq!(seen, vec![b"8".to_vec()]);
}

#[test]
fn seek_lands_on_next_key_between_entries() {
    let (_dir, engine) = open_engine();
    for i in 1..=9u32 {
        engine.put(format!("{}", i), b"x").unwrap();
    }
    let ks = engine.default_keyspace().unwrap();
    let mut iter = ks.iter().unwrap();

    // No exact match: first key >= "75" is "8", last key <= "75" is "7"
    iter.seek(b"75").unwrap();
    assert_eq!(iter.key().unwrap(), b"8");
    iter.seek_for_prev(b"75").unwrap();
    assert_eq!(iter.key().unwrap(), b"7");

    // Before the first and after the last
    iter.seek(b"0").unwrap();
    assert_eq!(iter.key().unwrap(), b"1");
    iter.seek(b"99").unwrap();
    assert!(!iter.is_valid());
    iter.seek_for_prev(b"0").unwrap();
    assert!(!iter.is_valid());
}

#[test]
fn snapshot_reads_are_frozen() {
    let (_dir, engine) = open_engine();
    engine.put(b"1x1", b"1").unwrap();

    let snapshot = engine.snapshot().unwrap();
    engine.put(b"1x1", b"1-change-after-snapshot").unwrap();

    assert_eq!(
        engine.get(b"1x1").unwrap().as_deref(),
        Some(&b"1-change-after-snapshot"[..])
    );
    assert_eq!(
        engine.get_at(&snapshot, b"1x1").unwrap().as_deref(),
        Some(&b"1"[..])
    );

    // A key written after the snapshot is invisible through it
    engine.put(b"2x2", b"4").unwrap();
    assert_eq!(engine.get_at(&snapshot, b"2x2").unwrap(), None);
}

#[test]
fn snapshot_iterator_vs_current_iterator() {
    let (_dir, engine) = open_engine();
    fill_table(&engine, 5);

    let ks = engine.default_keyspace().unwrap();
    let snapshot = engine.snapshot().unwrap();
    fill_table(&engine, 9);

    let count = |mut iter: stratadb::Iter| {
        let mut n = 0;
        iter.seek_to_first().unwrap();
        while iter.is_valid() {
            n += 1;
            iter.next().unwrap();
        }
        n
    };

    assert_eq!(count(ks.iter_at(&snapshot).unwrap()), 25);
    assert_eq!(count(ks.iter().unwrap()), 81);
}

#[test]
fn unbound_iterator_observes_later_commits() {
    let (_dir, engine) = open_engine();
    engine.put(b"a", b"1").unwrap();
    engine.put(b"c", b"3").unwrap();

    let ks = engine.default_keyspace().unwrap();
    let mut iter = ks.iter().unwrap();
    iter.seek_to_first().unwrap();
    assert_eq!(iter.key().unwrap(), b"a");

    // Committed while the iterator is parked on "a"
    engine.put(b"b", b"2").unwrap();
    iter.next().unwrap();
    assert_eq!(iter.key().unwrap(), b"b");
}

#[test]
fn snapshot_iterator_ignores_later_commits_mid_scan() {
    let (_dir, engine) = open_engine();
    engine.put(b"a", b"1").unwrap();
    engine.put(b"c", b"3").unwrap();

    let ks = engine.default_keyspace().unwrap();
    let snapshot = engine.snapshot().unwrap();
    let mut iter = ks.iter_at(&snapshot).unwrap();
    iter.seek_to_first().unwrap();

    engine.put(b"b", b"2").unwrap();
    iter.next().unwrap();
    assert_eq!(iter.key().unwrap(), b"c");
}

#[test]
fn deleted_keys_are_skipped_by_iterators() {
    let (_dir, engine) = open_engine();
    engine.put(b"a", b"1").unwrap();
    engine.put(b"b", b"2").unwrap();
    engine.put(b"c", b"3").unwrap();
    engine.delete(b"b").unwrap();

    let ks = engine.default_keyspace().unwrap();
    let mut iter = ks.iter().unwrap();
    iter.seek_to_first().unwrap();
    assert_eq!(iter.key().unwrap(), b"a");
    iter.next().unwrap();
    assert_eq!(iter.key().unwrap(), b"c");

    // But a snapshot from before the delete still sees "b"
    let pre_delete = {
        engine.put(b"b", b"2-again").unwrap();
        let snap = engine.snapshot().unwrap();
        engine.delete(b"b").unwrap();
        snap
    };
    assert_eq!(
        engine.get_at(&pre_delete, b"b").unwrap().as_deref(),
        Some(&b"2-again"[..])
    );
}

#[test]
fn batch_is_atomic_under_concurrent_reader() {
    let (_dir, engine) = open_engine();
    let keys: Vec<String> = (0..8).map(|i| format!("key{}", i)).collect();

    // Seed generation 0
    let ks = engine.default_keyspace().unwrap();
    let mut batch = WriteBatch::new();
    for key in &keys {
        batch.put(&ks, key, b"0");
    }
    engine.write(&batch).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
        let engine = engine.clone();
        let keys = keys.clone();
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                // A snapshot freezes one boundary; every key must carry
                // the same generation or the batch was seen half-applied.
                let snap = engine.snapshot().unwrap();
                let first = engine.get_at(&snap, &keys[0]).unwrap().unwrap();
                for key in &keys[1..] {
                    let value = engine.get_at(&snap, key).unwrap().unwrap();
                    assert_eq!(value, first, "partial batch observed");
                }
            }
        })
    };

    for generation in 1..200u32 {
        let mut batch = WriteBatch::new();
        let value = generation.to_string();
        for key in &keys {
            batch.put(&ks, key, &value);
        }
        engine.write(&batch).unwrap();
    }

    stop.store(true, Ordering::Relaxed);
    reader.join().unwrap();
}

#[test]
fn batch_spans_keyspaces_atomically() {
    let (_dir, engine) = open_engine();
    let default = engine.default_keyspace().unwrap();
    let new_cf = engine.create_keyspace("new_cf").unwrap();

    engine.put(b"key", b"value").unwrap();

    let mut batch = WriteBatch::new();
    batch.put(&default, b"key2", b"value2");
    batch.put(&new_cf, b"key3", b"value3");
    batch.delete(&default, b"key");
    engine.write(&batch).unwrap();

    assert_eq!(engine.get(b"key").unwrap(), None);
    assert_eq!(engine.get(b"key2").unwrap().as_deref(), Some(&b"value2"[..]));
    assert_eq!(new_cf.get(b"key3").unwrap().as_deref(), Some(&b"value3"[..]));
}

#[test]
fn dropped_keyspace_is_invisible_and_closed() {
    let (_dir, engine) = open_engine();
    let cf = engine.create_keyspace("new_cf").unwrap();
    cf.put(b"k", b"v").unwrap();
    let mut iter = cf.iter().unwrap();

    engine.drop_keyspace("new_cf").unwrap();

    assert!(matches!(cf.get(b"k"), Err(StrataError::KeySpaceClosed(_))));
    assert!(matches!(
        iter.seek_to_first(),
        Err(StrataError::KeySpaceClosed(_))
    ));

    // The default keyspace never sees the other namespace's keys
    let default = engine.default_keyspace().unwrap();
    let mut iter = default.iter().unwrap();
    iter.seek_to_first().unwrap();
    assert!(!iter.is_valid());
}

#[test]
fn gc_reclaims_superseded_revisions_but_not_snapshots() {
    let dir = tempdir().unwrap();
    // Keep opportunistic GC quiet; this test drives run_gc() by hand
    let opts = Options::default().gc_config(stratadb::GcConfig {
        interval: std::time::Duration::from_secs(3600),
        min_revisions: 1_000_000,
        enabled: true,
    });
    let engine = Engine::open(dir.path().join("db"), opts).unwrap();

    engine.put(b"k", b"v1").unwrap();
    let snapshot = engine.snapshot().unwrap();
    engine.put(b"k", b"v2").unwrap();
    engine.put(b"k", b"v3").unwrap();

    let run = engine.run_gc().unwrap().unwrap();
    // v2 is reclaimable (superseded, invisible to the snapshot); v1 is
    // pinned by the snapshot.
    assert_eq!(run.revisions_removed, 1);
    assert_eq!(
        engine.get_at(&snapshot, b"k").unwrap().as_deref(),
        Some(&b"v1"[..])
    );

    drop(snapshot);
    let run = engine.run_gc().unwrap().unwrap();
    assert_eq!(run.revisions_removed, 1);
    assert_eq!(engine.get(b"k").unwrap().as_deref(), Some(&b"v3"[..]));
}

#[test]
fn statistics_expose_stable_names_and_monotonic_counters() {
    let (_dir, engine) = open_engine();
    let stats = engine.statistics();

    engine.put(b"some-key", b"some-value").unwrap();
    for _ in 0..10 {
        engine.get(b"some-key").unwrap();
    }

    assert_eq!(stats.ticker(Ticker::NumberKeysWritten), 1);
    assert_eq!(stats.ticker(Ticker::NumberKeysRead), 10);

    let snapshot = stats.snapshot();
    assert!(snapshot
        .tickers
        .iter()
        .any(|(name, count)| *name == "stratadb.number.keys.read" && *count == 10));

    let data = stats.histogram_data(stratadb::Histogram::DbGet);
    assert_eq!(data.count, 10);

    // Printable dump, one line per metric
    let dump = stats.to_string();
    assert!(dump.contains("stratadb.number.keys.written COUNT : 1"));
}

#[test]
fn open_transaction_blocks_close_until_finished() {
    let (_dir, engine) = open_engine();
    let ks = engine.default_keyspace().unwrap();
    let mut txn = engine.begin_transaction(TxnMode::Optimistic).unwrap();
    txn.put(&ks, b"k", b"v").unwrap();

    assert!(matches!(engine.close(), Err(StrataError::Busy { .. })));
    txn.commit().unwrap();
    engine.close().unwrap();
}
