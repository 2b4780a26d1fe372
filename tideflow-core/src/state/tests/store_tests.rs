use super::*;

/// Count aggregate used across the store tests.
struct CountAgg;

impl Aggregate<i64, i64, i64> for CountAgg {
    fn create_accumulator(&self) -> i64 {
        0
    }
    fn add(&self, acc: &mut i64, _element: &i64) {
        *acc += 1;
    }
    fn merge(&self, acc: &mut i64, other: i64) {
        *acc += other;
    }
    fn result(&self, acc: &i64) -> i64 {
        *acc
    }
}

fn key_bytes(key: &str) -> Vec<u8> {
    bincode::serialize(&key.to_string()).unwrap()
}

#[test]
fn test_delta_folds_per_key_and_window() {
    let agg = CountAgg;
    let mut delta: StateDelta<String, i64> = StateDelta::new();
    let w0 = TimeWindow::new(0, 5_000);
    let w1 = TimeWindow::new(5_000, 10_000);

    delta.add(key_bytes("a"), &"a".to_string(), w0, &1, &agg);
    delta.add(key_bytes("a"), &"a".to_string(), w0, &2, &agg);
    delta.add(key_bytes("a"), &"a".to_string(), w1, &3, &agg);
    delta.add(key_bytes("b"), &"b".to_string(), w0, &4, &agg);

    assert_eq!(delta.entries.len(), 3);
    assert_eq!(delta.entries[&(key_bytes("a"), w0)].1, 2);
    assert_eq!(delta.entries[&(key_bytes("a"), w1)].1, 1);
    assert_eq!(delta.entries[&(key_bytes("b"), w0)].1, 1);
}

#[test]
fn test_merge_delta_remerges_partials() {
    let agg = CountAgg;
    let mut store: StateStore<String, i64> = StateStore::new(true, 1_000);
    let w0 = TimeWindow::new(0, 5_000);

    // Two partition deltas for the same (key, window), merged in either
    // order, must sum.
    let mut d1: StateDelta<String, i64> = StateDelta::new();
    d1.add(key_bytes("a"), &"a".to_string(), w0, &1, &agg);
    let mut d2: StateDelta<String, i64> = StateDelta::new();
    d2.add(key_bytes("a"), &"a".to_string(), w0, &2, &agg);
    d2.add(key_bytes("a"), &"a".to_string(), w0, &3, &agg);

    let changed = store.merge_delta(d2, &agg, 100);
    assert_eq!(changed, vec![(key_bytes("a"), w0)]);
    store.merge_delta(d1, &agg, 200);

    let entry = store.get(&(key_bytes("a"), w0)).unwrap();
    assert_eq!(entry.acc, 3);
    assert_eq!(entry.key, "a");
    assert_eq!(entry.last_updated, 200);
}

#[test]
fn test_evict_removes_only_closed_windows() {
    let agg = CountAgg;
    let mut store: StateStore<String, i64> = StateStore::new(true, 1_000);
    let closed_a = TimeWindow::new(0, 5_000);
    let closed_b = TimeWindow::new(5_000, 10_000);
    let open = TimeWindow::new(10_000, 15_000);

    for window in [closed_a, closed_b, open] {
        store.upsert(key_bytes("a"), &"a".to_string(), window, &1, &agg, 0);
    }
    assert_eq!(store.len(), 3);

    let evicted = store.evict(10_000);
    assert_eq!(evicted.len(), 2);
    assert!(store.get(&(key_bytes("a"), closed_a)).is_none());
    assert!(store.get(&(key_bytes("a"), closed_b)).is_none());
    assert!(store.get(&(key_bytes("a"), open)).is_some());
}

#[test]
fn test_snapshot_restore_roundtrip() {
    let agg = CountAgg;
    let mut store: StateStore<String, i64> = StateStore::new(true, 1_000);
    let w0 = TimeWindow::new(0, 5_000);
    let w1 = TimeWindow::new(5_000, 10_000);

    store.upsert(key_bytes("a"), &"a".to_string(), w0, &1, &agg, 50);
    store.upsert(key_bytes("a"), &"a".to_string(), w0, &2, &agg, 60);
    store.upsert(key_bytes("b"), &"b".to_string(), w1, &3, &agg, 60);

    let snapshot = store.snapshot().unwrap();

    let mut restored: StateStore<String, i64> = StateStore::new(true, 1_000);
    restored.restore(&snapshot).unwrap();
    assert_eq!(restored.len(), 2);
    assert_eq!(restored.get(&(key_bytes("a"), w0)).unwrap().acc, 2);
    assert_eq!(restored.get(&(key_bytes("b"), w1)).unwrap().acc, 1);

    let mut windows: Vec<TimeWindow> = restored.windows().collect();
    windows.sort();
    windows.dedup();
    assert_eq!(windows, vec![w0, w1]);
}

#[test]
fn test_restore_empty_snapshot_clears() {
    let agg = CountAgg;
    let mut store: StateStore<String, i64> = StateStore::new(true, 1_000);
    store.upsert(
        key_bytes("a"),
        &"a".to_string(),
        TimeWindow::new(0, 5_000),
        &1,
        &agg,
        0,
    );
    store.restore(&[]).unwrap();
    assert!(store.is_empty());
}
