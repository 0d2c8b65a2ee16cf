//! Integration tests: store, batches and overlays through the public API.
//!
//! Each test opens a real on-disk store in a temp directory unless it only
//! needs the in-memory engine.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tempfile::TempDir;

use stackdb::{Config, DbParams, Overlay, Store};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_store(obfuscate: bool) -> (Store, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(DbParams::new(dir.path().join("db")).with_obfuscate(obfuscate)).unwrap();
    (store, dir)
}

fn reopen(dir: &TempDir) -> Store {
    Store::open(DbParams::new(dir.path().join("db"))).unwrap()
}

fn newest_log(db_path: &Path) -> PathBuf {
    let mut logs: Vec<PathBuf> = std::fs::read_dir(db_path.join("wal"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "log"))
        .collect();
    logs.sort();
    logs.pop().unwrap()
}

fn string_keys<P: stackdb::KvRead>(tx: &Overlay<'_, P>) -> Vec<(String, u32)> {
    let mut out = Vec::new();
    let mut it = tx.iter();
    it.seek_to_first();
    while it.valid() {
        out.push((it.key::<String>().unwrap(), it.value::<u32>().unwrap()));
        it.next();
    }
    out
}

// ---------------------------------------------------------------------------
// Overlay scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_delete_and_write_in_fresh_overlay() {
    let (store, _dir) = test_store(true);

    let tx = Overlay::new(&store);
    tx.write("a", 1u32);
    tx.commit().unwrap();
    assert_eq!(store.read::<_, u32>("a"), Some(1));

    let tx = Overlay::new(&store);
    tx.write("b", 2u32);
    tx.erase("a");

    assert_eq!(tx.read::<_, u32>("a"), None);
    assert_eq!(tx.read::<_, u32>("b"), Some(2));
    assert_eq!(string_keys(&tx), vec![("b".to_string(), 2)]);

    tx.commit().unwrap();
    assert!(tx.is_clean());

    let mut it = store.new_iterator();
    it.seek_to_first();
    assert_eq!(it.key::<String>(), Some("b".to_string()));
    assert_eq!(it.value::<u32>(), Some(2));
    it.next();
    assert!(!it.valid());
}

#[test]
fn test_nested_overlay_shadows_committed_value_once() {
    let (store, _dir) = test_store(false);
    let tx1 = Overlay::new(&store);
    let tx2 = Overlay::new(&tx1);

    tx1.write("x", 1u32);
    tx1.commit().unwrap();
    assert_eq!(store.read::<_, u32>("x"), Some(1));

    tx2.write("x", 2u32);
    assert_eq!(tx2.read::<_, u32>("x"), Some(2));
    assert_eq!(tx1.read::<_, u32>("x"), Some(1));
    assert_eq!(string_keys(&tx2), vec![("x".to_string(), 2)]);
}

#[test]
fn test_erase_commit_removes_preexisting_key() {
    let (store, dir) = test_store(true);
    for i in 0..20u32 {
        store.write(&i, &i, false).unwrap();
    }

    let tx = Overlay::new(&store);
    for i in (0..20u32).step_by(2) {
        tx.erase(&i);
    }
    tx.commit().unwrap();
    drop(tx);
    drop(store);

    let store = reopen(&dir);
    for i in 0..20u32 {
        assert_eq!(store.read::<_, u32>(&i), if i % 2 == 0 { None } else { Some(i) });
    }
}

#[test]
fn test_merge_traversal_is_sorted_union() {
    let store = Store::open(DbParams::in_memory()).unwrap();
    for i in (0..100u32).step_by(3) {
        store.write(&i, &i, false).unwrap();
    }

    let tx = Overlay::new(&store);
    for i in (0..100u32).step_by(5) {
        tx.write(&i, i + 1000);
    }
    for i in (0..100u32).step_by(7) {
        tx.erase(&i);
    }

    let mut expected: Vec<u32> = (0..100u32)
        .filter(|i| (i % 3 == 0 || i % 5 == 0) && i % 7 != 0)
        .collect();
    expected.sort_unstable();

    let mut seen = Vec::new();
    let mut it = tx.iter();
    it.seek_to_first();
    while it.valid() {
        let key = it.key::<u32>().unwrap();
        let value = it.value::<u32>().unwrap();
        let shadowed = key % 5 == 0;
        assert_eq!(value, if shadowed { key + 1000 } else { key });
        seen.push(key);
        it.next();
    }
    assert_eq!(seen, expected);
}

#[test]
fn test_overlay_commit_into_batch_then_store() {
    let (store, dir) = test_store(true);
    store.write(&"stale", &0u8, true).unwrap();

    let tx = Overlay::new(&store);
    tx.erase("stale");
    tx.write("fresh", String::from("value"));

    let mut batch = store.new_batch();
    tx.commit_into(&mut batch).unwrap();
    assert!(batch.size_estimate() > 0);
    store.write_batch(&batch, true).unwrap();
    drop(store);

    let store = reopen(&dir);
    assert!(!store.exists("stale"));
    assert_eq!(store.read::<_, String>("fresh"), Some("value".to_string()));
}

// ---------------------------------------------------------------------------
// Persistence and atomicity
// ---------------------------------------------------------------------------

#[test]
fn test_committed_batch_fully_visible_after_reopen() {
    let (store, dir) = test_store(true);
    for i in 0..10u32 {
        store.write(&i, &i, false).unwrap();
    }

    let mut batch = store.new_batch();
    for i in 100..150u32 {
        batch.write(&i, &(i * 2));
    }
    for i in 0..5u32 {
        batch.erase(&i);
    }
    store.write_batch(&batch, true).unwrap();
    drop(store);

    let store = reopen(&dir);
    assert!((100..150u32).all(|i| store.read::<_, u32>(&i) == Some(i * 2)));
    assert!((0..5u32).all(|i| !store.exists(&i)));
    assert!((5..10u32).all(|i| store.exists(&i)));
}

#[test]
fn test_torn_batch_is_invisible_after_reopen() {
    let (store, dir) = test_store(false);
    store.write(&"base", &1u32, true).unwrap();

    let mut batch = store.new_batch();
    for i in 0..50u32 {
        batch.write(&i, &i);
    }
    batch.erase(&"base");
    store.write_batch(&batch, true).unwrap();
    drop(store);

    // Cut the last record short, as a crash mid-append would.
    let log = newest_log(&dir.path().join("db"));
    let file = OpenOptions::new().write(true).open(&log).unwrap();
    let len = file.metadata().unwrap().len();
    file.set_len(len - 3).unwrap();
    drop(file);

    let store = reopen(&dir);
    assert_eq!(store.read::<_, u32>(&"base"), Some(1));
    assert!((0..50u32).all(|i| !store.exists(&i)));
}

#[test]
fn test_writes_after_torn_batch_survive_reopen() {
    let (store, dir) = test_store(false);
    store.write(&"base", &1u32, true).unwrap();
    let mut batch = store.new_batch();
    for i in 0..5000u32 {
        batch.write(&i, &i);
    }
    store.write_batch(&batch, true).unwrap();
    drop(store);

    let log = newest_log(&dir.path().join("db"));
    let file = OpenOptions::new().write(true).open(&log).unwrap();
    let len = file.metadata().unwrap().len();
    // A deep cut leaves a torn header whose length reaches past the file end.
    file.set_len(len - 20_000).unwrap();
    drop(file);

    let store = reopen(&dir);
    store.write(&"after", &2u32, true).unwrap();
    let tx = Overlay::new(&store);
    tx.write(&"committed", 3u32);
    tx.commit().unwrap();
    store.write(&"synced", &4u32, true).unwrap();
    drop(tx);
    drop(store);

    let store = reopen(&dir);
    assert_eq!(store.read::<_, u32>(&"base"), Some(1));
    assert_eq!(store.read::<_, u32>(&"after"), Some(2));
    assert_eq!(store.read::<_, u32>(&"committed"), Some(3));
    assert_eq!(store.read::<_, u32>(&"synced"), Some(4));
    assert!(!store.exists(&0u32));
}

#[test]
fn test_obfuscated_values_not_on_disk_in_clear() {
    let (store, dir) = test_store(true);
    let marker = "plain-text-marker-0123456789".to_string();
    store.write(&1u8, &marker, true).unwrap();
    drop(store);

    let raw = std::fs::read(newest_log(&dir.path().join("db"))).unwrap();
    let needle = marker.as_bytes();
    assert!(!raw.windows(needle.len()).any(|w| w == needle));

    let store = reopen(&dir);
    assert_eq!(store.read::<_, String>(&1u8), Some(marker));
}

#[test]
fn test_force_compact_keeps_data() {
    let (store, dir) = test_store(true);
    for round in 0..5u32 {
        for i in 0..50u32 {
            store.write(&i, &(i + round), false).unwrap();
        }
    }
    let key = store.obfuscate_key().clone();
    drop(store);

    let store = Store::open(
        DbParams::new(dir.path().join("db")).with_config(Config::default().with_force_compact(true)),
    )
    .unwrap();
    assert_eq!(store.obfuscate_key(), &key);
    assert!((0..50u32).all(|i| store.read::<_, u32>(&i) == Some(i + 4)));
}

// ---------------------------------------------------------------------------
// Throughput
// ---------------------------------------------------------------------------

#[test]
fn test_overlay_bulk_commit() {
    let (store, _dir) = test_store(true);
    let count = 10_000u32;

    let start = Instant::now();
    let tx = Overlay::new(&store);
    for i in 0..count {
        tx.write(&(b'u', i), u64::from(i));
    }
    let stage_time = start.elapsed();
    assert_eq!(tx.memory_usage(), count as usize * (5 + 8));

    let start = Instant::now();
    let mut batch = store.new_batch();
    tx.commit_into(&mut batch).unwrap();
    store.write_batch(&batch, true).unwrap();
    let commit_time = start.elapsed();

    let start = Instant::now();
    let mut it = store.new_iterator();
    it.seek(&(b'u', 0u32));
    let mut walked = 0u32;
    while let Some((prefix, i)) = it.key::<(u8, u32)>() {
        if prefix != b'u' {
            break;
        }
        assert_eq!(it.value::<u64>(), Some(u64::from(i)));
        walked += 1;
        it.next();
    }
    let walk_time = start.elapsed();
    assert_eq!(walked, count);

    println!("\n=== Overlay Bulk Commit ({} entries) ===", count);
    println!("  Stage:  {:?}", stage_time);
    println!("  Commit: {:?}", commit_time);
    println!("  Walk:   {:?}", walk_time);
}
