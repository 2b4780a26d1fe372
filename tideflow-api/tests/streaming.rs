use std::time::Duration;

use tideflow_api::{AggregateRegistry, QueryBuilder};
use tideflow_core::checkpoint::{CheckpointStorage, FsCheckpointStorage};
use tideflow_core::config::{LateDataPolicy, OutputMode, TriggerMode};
use tideflow_core::error::{EngineError, Termination};
use tideflow_core::output::{EmittedRow, MemorySink};
use tideflow_core::source::MemorySource;
use tideflow_core::trigger::SchedulerState;
use tideflow_core::window::{TimeWindow, WindowSpec};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
struct Event {
    user: String,
    ts: i64,
}

fn event(user: &str, ts: i64) -> Event {
    Event {
        user: user.to_string(),
        ts,
    }
}

fn minute(m: i64) -> i64 {
    m * 60_000
}

fn count_query(name: &str) -> QueryBuilder<Event, String> {
    QueryBuilder::new(name)
        .key_by(|e: &Event| e.user.clone())
        .watermark(|e: &Event| e.ts, Duration::from_secs(60))
}

fn lcg_next(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

#[test]
fn test_tumbling_window_emits_exact_final_row() {
    // Tumbling 5-minute windows, allowed lateness 1 minute; events for key
    // A at 00:01, 00:04, 00:07. Watermark after the batch is
    // 00:07 - 00:01 = 00:06, which closes [00:00, 00:05) with count 2 and
    // leaves [00:05, 00:10) open.
    let source = MemorySource::new();
    for ts in [minute(1), minute(4), minute(7)] {
        source.push(event("A", ts), ts);
    }
    let sink: MemorySink<String, i64> = MemorySink::new();
    let registry = AggregateRegistry::default();

    let query = count_query("five-minute-counts")
        .source("events", source)
        .window(WindowSpec::tumbling(Duration::from_secs(300)))
        .trigger(TriggerMode::Once)
        .output_mode(OutputMode::Append)
        .aggregate_named(&registry, "count", |_| 0)
        .unwrap()
        .start(sink.clone())
        .unwrap();

    assert_eq!(
        query.await_termination(Duration::from_secs(5)),
        Termination::Completed
    );
    query.join().unwrap();
    assert_eq!(query.state(), SchedulerState::Stopped);

    let rows = sink.rows();
    assert_eq!(
        rows,
        vec![EmittedRow {
            key: "A".to_string(),
            window: TimeWindow::new(0, minute(5)),
            value: 2,
        }]
    );

    let progress = query.progress();
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].watermark, minute(6));
    assert_eq!(progress[0].late_dropped, 0);
}

#[test]
fn test_once_mode_consumes_all_offsets_then_stops() {
    let source = MemorySource::new();
    for i in 0..100i64 {
        source.push(event("A", i * 1_000), i * 1_000);
    }
    let sink: MemorySink<String, i64> = MemorySink::new();
    let registry = AggregateRegistry::default();

    let dir = tempfile::tempdir().unwrap();
    let query = count_query("drain-once")
        .source("events", source)
        .window(WindowSpec::tumbling(Duration::from_secs(20)))
        .trigger(TriggerMode::Once)
        .checkpoint_location(dir.path())
        .aggregate_named(&registry, "count", |_| 0)
        .unwrap()
        .start(sink)
        .unwrap();

    assert_eq!(
        query.await_termination(Duration::from_secs(5)),
        Termination::Completed
    );
    query.join().unwrap();
    assert_eq!(query.state(), SchedulerState::Stopped);

    // All 100 offsets in a single increment.
    let progress = query.progress();
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].increment_id, 1);
    assert_eq!(progress[0].rows_read, 100);

    let storage = FsCheckpointStorage::new(dir.path()).unwrap();
    let manifest = storage.load(1).unwrap();
    assert_eq!(manifest.offsets["events"].0, 100);
}

#[test]
fn test_crash_restart_resumes_without_gaps_or_duplicates() {
    // Tumbling 20s count for a single key; ts = i * 1000.
    let dir = tempfile::tempdir().unwrap();
    let registry = AggregateRegistry::default();

    let run = |source: MemorySource<Event>, sink: MemorySink<String, i64>, name: &str| {
        let query = QueryBuilder::new(name)
            .key_by(|e: &Event| e.user.clone())
            .watermark(|e: &Event| e.ts, Duration::ZERO)
            .source("events", source)
            .window(WindowSpec::tumbling(Duration::from_secs(20)))
            .trigger(TriggerMode::Once)
            .output_mode(OutputMode::Append)
            .checkpoint_location(dir.path())
            .aggregate_named(&registry, "count", |_| 0)
            .unwrap()
            .start(sink)
            .unwrap();
        assert_eq!(
            query.await_termination(Duration::from_secs(5)),
            Termination::Completed
        );
        query.join().unwrap();
        query
    };

    // First process: records 0..50.
    let source = MemorySource::new();
    for i in 0..50i64 {
        source.push(event("A", i * 1_000), i * 1_000);
    }
    let sink1: MemorySink<String, i64> = MemorySink::new();
    let query1 = run(source.clone(), sink1.clone(), "run-1");
    assert_eq!(query1.progress()[0].rows_read, 50);

    // Watermark 49s: [0,20s) and [20s,40s) close and emit; [40s,60s)
    // stays open with 10 records of state.
    let mut first_run_rows: Vec<(TimeWindow, i64)> = sink1
        .rows()
        .into_iter()
        .map(|row| (row.window, row.value))
        .collect();
    first_run_rows.sort();
    assert_eq!(
        first_run_rows,
        vec![
            (TimeWindow::new(0, 20_000), 20),
            (TimeWindow::new(20_000, 40_000), 20),
        ]
    );

    // "Crash": the process goes away; the replayable source gains data.
    for i in 50..80i64 {
        source.push(event("A", i * 1_000), i * 1_000);
    }

    // Restart over the same checkpoint location.
    let sink2: MemorySink<String, i64> = MemorySink::new();
    let query2 = run(source, sink2.clone(), "run-2");

    // Only the 30 new offsets are processed; the increment id continues.
    let progress = query2.progress();
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].increment_id, 2);
    assert_eq!(progress[0].rows_read, 30);
    assert!(!query2.degraded_recovery());

    // Watermark is now 79s: [40s,60s) closes with count 20 — 10 records
    // restored from checkpointed state plus 10 new ones. Each offset is
    // counted exactly once across the crash, and the windows emitted by
    // the first run are not re-emitted.
    assert_eq!(
        sink2.rows(),
        vec![EmittedRow {
            key: "A".to_string(),
            window: TimeWindow::new(40_000, 60_000),
            value: 20,
        }]
    );

    let storage = FsCheckpointStorage::new(dir.path()).unwrap();
    let manifest = storage.load(2).unwrap();
    assert_eq!(manifest.offsets["events"].0, 80);
}

#[test]
fn test_recovery_skips_staged_and_corrupt_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let registry = AggregateRegistry::default();

    let source = MemorySource::new();
    source.push(event("A", 1_000), 1_000);
    let query = count_query("staging-crash")
        .source("events", source.clone())
        .window(WindowSpec::tumbling(Duration::from_secs(10)))
        .trigger(TriggerMode::Once)
        .checkpoint_location(dir.path())
        .aggregate_named(&registry, "count", |_| 0)
        .unwrap()
        .start(MemorySink::<String, i64>::new())
        .unwrap();
    query.await_termination(Duration::from_secs(5));
    query.join().unwrap();

    // Crash after staging, before the publish swap: a leftover staging
    // file must be invisible to recovery.
    std::fs::write(dir.path().join("chk-2.staging"), b"half-written").unwrap();
    let restarted = count_query("staging-crash-restart")
        .source("events", source.clone())
        .window(WindowSpec::tumbling(Duration::from_secs(10)))
        .trigger(TriggerMode::Once)
        .checkpoint_location(dir.path())
        .aggregate_named(&registry, "count", |_| 0)
        .unwrap()
        .start(MemorySink::<String, i64>::new())
        .unwrap();
    assert!(!restarted.degraded_recovery());
    restarted.await_termination(Duration::from_secs(5));
    restarted.join().unwrap();

    // A corrupt *published* checkpoint is a degraded recovery: the engine
    // falls back to the previous one and says so.
    std::fs::write(dir.path().join("chk-9"), b"corrupt").unwrap();
    let degraded = count_query("degraded-restart")
        .source("events", source)
        .window(WindowSpec::tumbling(Duration::from_secs(10)))
        .trigger(TriggerMode::Once)
        .checkpoint_location(dir.path())
        .aggregate_named(&registry, "count", |_| 0)
        .unwrap()
        .start(MemorySink::<String, i64>::new())
        .unwrap();
    assert!(degraded.degraded_recovery());
    degraded.await_termination(Duration::from_secs(5));
    degraded.join().unwrap();
}

#[test]
fn test_complete_mode_without_watermark_is_rejected_at_start() {
    let registry = AggregateRegistry::default();
    let result = QueryBuilder::<Event, String>::new("unbounded-complete")
        .source("events", MemorySource::new())
        .key_by(|e: &Event| e.user.clone())
        // No watermark: state is unbounded.
        .window(WindowSpec::tumbling(Duration::from_secs(10)))
        .output_mode(OutputMode::Complete)
        .aggregate_named(&registry, "count", |_| 0)
        .unwrap()
        .start(MemorySink::<String, i64>::new());

    let err = match result {
        Ok(_) => panic!("complete mode without a watermark must not start"),
        Err(err) => err,
    };
    match err {
        EngineError::UnsupportedOutputMode(message) => {
            assert!(message.contains("watermark"));
        }
        other => panic!("expected UnsupportedOutputMode, got: {other}"),
    }
}

#[test]
fn test_complete_mode_reemits_full_table() {
    let source = MemorySource::new();
    source.push(event("A", 1_000), 1_000);
    source.push(event("B", 2_000), 2_000);
    let sink: MemorySink<String, i64> = MemorySink::new();
    let registry = AggregateRegistry::default();

    let query = count_query("complete-table")
        .source("events", source.clone())
        .window(WindowSpec::tumbling(Duration::from_secs(60)))
        .trigger(TriggerMode::FixedInterval(Duration::from_millis(10)))
        .output_mode(OutputMode::Complete)
        .aggregate_named(&registry, "count", |_| 0)
        .unwrap()
        .start(sink.clone())
        .unwrap();

    std::thread::sleep(Duration::from_millis(30));
    source.push(event("A", 3_000), 3_000);
    std::thread::sleep(Duration::from_millis(30));
    query.stop(Duration::from_secs(5)).unwrap();

    let batches = sink.batches();
    assert_eq!(batches.len(), 2);
    // First increment: both keys, count 1 each.
    assert_eq!(batches[0].rows.len(), 2);
    // Second increment re-emits the whole table, with A's count updated —
    // including the unchanged B row.
    assert_eq!(batches[1].rows.len(), 2);
    let a_row = batches[1]
        .rows
        .iter()
        .find(|row| row.key == "A")
        .expect("row for A");
    assert_eq!(a_row.value, 2);
    let b_row = batches[1]
        .rows
        .iter()
        .find(|row| row.key == "B")
        .expect("row for B");
    assert_eq!(b_row.value, 1);
}

#[test]
fn test_watermark_is_monotone_for_shuffled_input() {
    // Deterministically shuffled event times across several increments;
    // the reported watermark must never decrease.
    let source = MemorySource::new();
    let sink: MemorySink<String, i64> = MemorySink::new();
    let registry = AggregateRegistry::default();

    let query = count_query("monotone-watermark")
        .source("events", source.clone())
        .window(WindowSpec::tumbling(Duration::from_secs(5)))
        .trigger(TriggerMode::FixedInterval(Duration::from_millis(10)))
        .output_mode(OutputMode::Update)
        .aggregate_named(&registry, "count", |_| 0)
        .unwrap()
        .start(sink)
        .unwrap();

    let mut state = 2026u64;
    for _ in 0..5 {
        for _ in 0..40 {
            let ts = (lcg_next(&mut state) % 600_000) as i64;
            let user = format!("u{}", lcg_next(&mut state) % 4);
            source.push(Event { user, ts }, ts);
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    query.stop(Duration::from_secs(5)).unwrap();

    let watermarks: Vec<i64> = query.progress().iter().map(|p| p.watermark).collect();
    assert!(!watermarks.is_empty());
    assert!(
        watermarks.windows(2).all(|pair| pair[0] <= pair[1]),
        "watermark regressed: {watermarks:?}"
    );
}

#[test]
fn test_append_emits_each_window_exactly_once() {
    let source = MemorySource::new();
    let sink: MemorySink<String, i64> = MemorySink::new();
    let registry = AggregateRegistry::default();

    let query = QueryBuilder::new("append-once")
        .key_by(|e: &Event| e.user.clone())
        .watermark(|e: &Event| e.ts, Duration::ZERO)
        .source("events", source.clone())
        .window(WindowSpec::tumbling(Duration::from_secs(10)))
        .trigger(TriggerMode::FixedInterval(Duration::from_millis(10)))
        .output_mode(OutputMode::Append)
        .aggregate_named(&registry, "count", |_| 0)
        .unwrap()
        .start(sink.clone())
        .unwrap();

    // First increment: [0,10s) gets two records, watermark 9s, nothing
    // closed yet.
    source.push(event("A", 1_000), 1_000);
    source.push(event("A", 9_000), 9_000);
    std::thread::sleep(Duration::from_millis(30));

    // Second increment: ts 25s closes [0,10s) and [10s,20s) has no data.
    source.push(event("A", 25_000), 25_000);
    std::thread::sleep(Duration::from_millis(30));

    // Third increment: a record for the already-closed [0,10s) window is
    // late and must not resurrect it.
    source.push(event("A", 2_000), 2_000);
    std::thread::sleep(Duration::from_millis(30));

    query.stop(Duration::from_secs(5)).unwrap();

    let closed_rows: Vec<EmittedRow<String, i64>> = sink
        .rows()
        .into_iter()
        .filter(|row| row.window == TimeWindow::new(0, 10_000))
        .collect();
    assert_eq!(closed_rows.len(), 1, "window emitted more than once");
    assert_eq!(closed_rows[0].value, 2);

    let total_late: u64 = query.progress().iter().map(|p| p.late_dropped).sum();
    assert_eq!(total_late, 1);
}

#[test]
fn test_late_records_route_to_side_output() {
    let source = MemorySource::new();
    let sink: MemorySink<String, i64> = MemorySink::new();
    let registry = AggregateRegistry::default();

    let query = QueryBuilder::new("side-output")
        .key_by(|e: &Event| e.user.clone())
        .watermark(|e: &Event| e.ts, Duration::ZERO)
        .late_policy(LateDataPolicy::SideOutput)
        .source("events", source.clone())
        .window(WindowSpec::tumbling(Duration::from_secs(10)))
        .trigger(TriggerMode::FixedInterval(Duration::from_millis(10)))
        .aggregate_named(&registry, "count", |_| 0)
        .unwrap()
        .start(sink)
        .unwrap();

    source.push(event("A", 50_000), 50_000);
    std::thread::sleep(Duration::from_millis(30));
    // Watermark is 50s; every window for ts=3s closed long ago.
    source.push(event("A", 3_000), 3_000);
    std::thread::sleep(Duration::from_millis(30));

    query.stop(Duration::from_secs(5)).unwrap();

    let late = query.late_records();
    assert_eq!(late.len(), 1);
    assert_eq!(late[0].value, event("A", 3_000));
    assert_eq!(late[0].event_time, Some(3_000));
}

#[test]
fn test_sliding_windows_count_multi_membership() {
    let source = MemorySource::new();
    // ts=7s is in [0,10s) and [5s,15s); ts=12s is in [5s,15s) and
    // [10s,20s); ts=21s closes the first two.
    for ts in [7_000, 12_000, 21_000] {
        source.push(event("A", ts), ts);
    }
    let sink: MemorySink<String, i64> = MemorySink::new();
    let registry = AggregateRegistry::default();

    let query = QueryBuilder::new("sliding-counts")
        .key_by(|e: &Event| e.user.clone())
        .watermark(|e: &Event| e.ts, Duration::ZERO)
        .source("events", source)
        .window(WindowSpec::sliding(
            Duration::from_secs(10),
            Duration::from_secs(5),
        ))
        .trigger(TriggerMode::Once)
        .output_mode(OutputMode::Append)
        .aggregate_named(&registry, "count", |_| 0)
        .unwrap()
        .start(sink.clone())
        .unwrap();

    query.await_termination(Duration::from_secs(5));
    query.join().unwrap();

    // Watermark 21s closes every window ending at or before it.
    let mut rows: Vec<(TimeWindow, i64)> = sink
        .rows()
        .into_iter()
        .map(|row| (row.window, row.value))
        .collect();
    rows.sort();
    assert_eq!(
        rows,
        vec![
            (TimeWindow::new(0, 10_000), 1),
            (TimeWindow::new(5_000, 15_000), 2),
            (TimeWindow::new(10_000, 20_000), 1),
        ]
    );
}

#[test]
fn test_parallel_partitions_match_single_partition() {
    let registry = AggregateRegistry::default();
    let mut state = 409u64;
    let mut events = Vec::new();
    for i in 0..240 {
        let user = format!("u{}", lcg_next(&mut state) % 6);
        let jitter = (lcg_next(&mut state) % 1_500) as i64 - 500;
        let ts = ((i as i64) * 1_000 + jitter).max(0);
        events.push(Event { user, ts });
    }

    let run_with = |partitions: usize| {
        let source = MemorySource::new();
        for e in &events {
            source.push(e.clone(), e.ts);
        }
        let sink: MemorySink<String, i64> = MemorySink::new();
        let query = count_query(&format!("parallel-{partitions}"))
            .source("events", source)
            .window(WindowSpec::tumbling(Duration::from_secs(5)))
            .trigger(TriggerMode::Once)
            .output_mode(OutputMode::Append)
            .partition_count(partitions)
            .aggregate_named(&registry, "count", |_| 0)
            .unwrap()
            .start(sink.clone())
            .unwrap();
        query.await_termination(Duration::from_secs(5));
        query.join().unwrap();

        let mut rows: Vec<(TimeWindow, String, i64)> = sink
            .rows()
            .into_iter()
            .map(|row| (row.window, row.key, row.value))
            .collect();
        rows.sort();
        rows
    };

    let single = run_with(1);
    let parallel = run_with(4);
    assert!(!single.is_empty());
    assert_eq!(single, parallel);
}

#[test]
fn test_continuous_mode_checkpoints_at_epoch_boundaries() {
    let source = MemorySource::new();
    let sink: MemorySink<String, i64> = MemorySink::new();
    let registry = AggregateRegistry::default();
    let dir = tempfile::tempdir().unwrap();

    let query = count_query("continuous-epochs")
        .source("events", source.clone())
        .window(WindowSpec::tumbling(Duration::from_secs(10)))
        .trigger(TriggerMode::Continuous(Duration::from_millis(20)))
        .output_mode(OutputMode::Update)
        .checkpoint_location(dir.path())
        .aggregate_named(&registry, "count", |_| 0)
        .unwrap()
        .start(sink.clone())
        .unwrap();

    source.push(event("A", 1_000), 1_000);
    std::thread::sleep(Duration::from_millis(50));
    source.push(event("A", 2_000), 2_000);
    std::thread::sleep(Duration::from_millis(50));
    query.stop(Duration::from_secs(5)).unwrap();

    // Every committed epoch published a checkpoint; the last one has all
    // offsets.
    let progress = query.progress();
    assert!(!progress.is_empty());
    let storage = FsCheckpointStorage::new(dir.path()).unwrap();
    let last = storage.list_published().unwrap();
    let manifest = storage.load(*last.last().unwrap()).unwrap();
    assert_eq!(manifest.offsets["events"].0, 2);

    // Both records landed in [0,10s).
    let final_rows = sink.rows();
    assert!(final_rows
        .iter()
        .any(|row| row.window == TimeWindow::new(0, 10_000) && row.value == 2));
}
