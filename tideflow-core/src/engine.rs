//! The assembled engine: one increment at a time, checkpointed.
//!
//! # Increment execution
//!
//! ```text
//! loop {
//!     wait_for_trigger()
//!     poll sources since last committed offsets   -> Batch
//!     partition batch by key hash                 -> worker deltas
//!     barrier: merge deltas into StateStore
//!     advance watermark, drain closed windows
//!     compute emission for the output mode        -> sink.write()
//!     stage + publish checkpoint {offsets, watermark, state}
//!     only now is the sink write considered durable
//!     evict closed windows
//! }
//! ```
//!
//! A crash anywhere before the checkpoint publish leaves the previous
//! checkpoint authoritative: on restart the engine re-polls the same
//! offset ranges and rewrites the same rows under the same increment id,
//! which an idempotent sink deduplicates.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::checkpoint::{CheckpointManager, CheckpointManifest, CheckpointStorage};
use crate::config::{EngineConfig, LateDataPolicy, TriggerMode};
use crate::error::{EngineError, Result, Termination};
use crate::output::{OutputCoordinator, Sink};
use crate::partition::HashPartitioner;
use crate::source::{poll_with_backoff, OffsetTracker, SourceAdapter};
use crate::state::{Aggregate, StateDelta, StateKey, StateStore};
use crate::trigger::{SchedulerState, TriggerScheduler};
use crate::types::{
    Batch, EventTime, IncrementId, OffsetRange, Record, SourceId, StreamData, EVENT_TIME_MIN,
};
use crate::window::{TimeWindow, WindowManager, WindowSpec};

/// Extracts the grouping key from a record value.
pub type KeyFn<T, K> = Arc<dyn Fn(&T) -> K + Send + Sync>;

/// Extracts the event-time column from a record value.
pub type EventTimeFn<T> = Arc<dyn Fn(&T) -> EventTime + Send + Sync>;

/// Per-increment progress, the engine's observable side of each commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementProgress {
    pub increment_id: IncrementId,
    pub rows_read: usize,
    pub rows_emitted: usize,
    pub late_dropped: u64,
    pub watermark: EventTime,
}

/// A record prepared for partitioned folding: key and timestamp resolved
/// once, on the engine thread.
struct Prepared<K, T> {
    key_bytes: Vec<u8>,
    key: K,
    event_time: EventTime,
    value: T,
}

/// Result of folding one partition of a batch.
struct WorkerResult<K, T, A> {
    delta: StateDelta<K, A>,
    late: Vec<Record<T>>,
    max_event_time: EventTime,
}

/// The micro-batch engine.
///
/// Construction recovers from the latest published checkpoint;
/// [`start`](Self::start) spawns the engine thread and returns the
/// control handle.
pub struct StreamEngine<T, K, A, OUT> {
    config: EngineConfig,
    window_spec: WindowSpec,
    sources: Vec<(SourceId, Box<dyn SourceAdapter<T>>)>,
    key_fn: KeyFn<T, K>,
    event_time_fn: Option<EventTimeFn<T>>,
    aggregate: Arc<dyn Aggregate<T, A, OUT>>,
    sink: Box<dyn Sink<K, OUT>>,
    checkpoints: CheckpointManager,

    tracker: OffsetTracker,
    store: StateStore<K, A>,
    windows: WindowManager,
    next_increment: IncrementId,
    degraded_recovery: bool,

    scheduler: TriggerScheduler,
    progress: Arc<Mutex<Vec<IncrementProgress>>>,
    late_records: Arc<Mutex<Vec<Record<T>>>>,
}

impl<T, K, A, OUT> StreamEngine<T, K, A, OUT>
where
    T: StreamData,
    K: StreamData,
    A: StreamData,
    OUT: StreamData,
{
    /// Build an engine and recover its position from `storage`.
    ///
    /// Validates the configuration eagerly: an unsupported output mode or
    /// window spec fails here, before any thread spawns.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        window_spec: WindowSpec,
        sources: Vec<(SourceId, Box<dyn SourceAdapter<T>>)>,
        key_fn: KeyFn<T, K>,
        event_time_fn: Option<EventTimeFn<T>>,
        aggregate: Arc<dyn Aggregate<T, A, OUT>>,
        sink: Box<dyn Sink<K, OUT>>,
        storage: Arc<dyn CheckpointStorage>,
    ) -> Result<Self> {
        config.validate()?;
        window_spec.validate()?;
        if sources.is_empty() {
            return Err(EngineError::InvalidConfig(
                "at least one source is required".to_string(),
            ));
        }

        let checkpoints =
            CheckpointManager::new(storage).with_retained_checkpoints(config.checkpoint_retention);
        let recovered = checkpoints.recover()?;

        let tracker = OffsetTracker::restore(recovered.manifest.offsets.clone());
        let mut store = StateStore::new(config.watermark_enabled, config.state_warn_threshold);
        store.restore(&recovered.manifest.state)?;

        let mut windows =
            WindowManager::new(window_spec, config.allowed_lateness, config.watermark_enabled);
        let mut live_windows: Vec<TimeWindow> = store.windows().collect();
        live_windows.sort_unstable();
        live_windows.dedup();
        windows.restore(recovered.manifest.watermark, live_windows);

        if recovered.manifest.increment_id > 0 {
            tracing::info!(
                "resuming from checkpoint {} (watermark={}, {} state entries)",
                recovered.manifest.increment_id,
                recovered.manifest.watermark,
                store.len()
            );
        }

        Ok(Self {
            scheduler: TriggerScheduler::new(config.trigger),
            next_increment: recovered.manifest.increment_id + 1,
            degraded_recovery: recovered.degraded,
            config,
            window_spec,
            sources,
            key_fn,
            event_time_fn,
            aggregate,
            sink,
            checkpoints,
            tracker,
            store,
            windows,
            progress: Arc::new(Mutex::new(Vec::new())),
            late_records: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Spawn the engine thread and return its control handle.
    pub fn start(self) -> Result<EngineHandle<T>> {
        let handle = EngineHandle {
            scheduler: self.scheduler.clone(),
            progress: Arc::clone(&self.progress),
            late_records: Arc::clone(&self.late_records),
            degraded_recovery: self.degraded_recovery,
            join: Mutex::new(None),
        };
        let join = thread::Builder::new()
            .name("tideflow-engine".to_string())
            .spawn(move || self.run())
            .map_err(EngineError::Io)?;
        *handle.join.lock().expect("join slot poisoned") = Some(join);
        Ok(handle)
    }

    fn run(mut self) -> Result<()> {
        self.scheduler.transition(SchedulerState::AwaitingTrigger);
        let mut last_started: Option<Instant> = None;

        let result = loop {
            if !self.scheduler.wait_for_trigger(last_started) {
                break Ok(());
            }
            last_started = Some(Instant::now());

            let outcome = match self.config.trigger {
                TriggerMode::Continuous(epoch) => self.run_epoch(epoch),
                _ => self.run_increment(),
            };
            if let Err(err) = outcome {
                break Err(err);
            }
            if matches!(self.config.trigger, TriggerMode::Once) || self.scheduler.stop_requested()
            {
                break Ok(());
            }
        };

        match &result {
            Ok(()) => {
                tracing::info!("engine stopped after increment {}", self.next_increment - 1);
                self.scheduler.transition(SchedulerState::Stopped);
            }
            Err(err) => {
                tracing::error!("engine failed: {err}");
                self.scheduler.transition(SchedulerState::Failed);
            }
        }
        result
    }

    // ── Micro-batch path ──────────────────────────────────────────────────────

    fn run_increment(&mut self) -> Result<()> {
        self.scheduler.transition(SchedulerState::Running);

        let batch = self.poll_sources()?;
        if batch.is_empty()
            && self.config.skip_empty_increments
            && !matches!(self.config.trigger, TriggerMode::Once)
        {
            // No data, no checkpoint: skipping avoids an unbounded trail of
            // empty manifests on an idle source.
            self.scheduler.transition(SchedulerState::AwaitingTrigger);
            return Ok(());
        }

        let rows_read = batch.records.len();
        let ranges = batch.ranges.clone();
        let prepared = self.prepare(batch)?;
        let watermark_floor = self.windows.watermark();

        let results = if self.config.partition_count > 1 {
            self.fold_parallel(prepared, watermark_floor)
        } else {
            vec![fold_partition(
                prepared,
                self.window_spec,
                watermark_floor,
                self.config.watermark_enabled,
                self.aggregate.as_ref(),
            )]
        };

        let mut late_count = 0u64;
        let mut max_event_time = EVENT_TIME_MIN;
        let mut late_routed: Vec<Record<T>> = Vec::new();
        let mut deltas = Vec::with_capacity(results.len());

        for result in results {
            max_event_time = max_event_time.max(result.max_event_time);
            late_count += result.late.len() as u64;
            if self.config.late_policy == LateDataPolicy::SideOutput {
                late_routed.extend(result.late);
            }
            deltas.push(result.delta);
        }

        // Deltas merge after the watermark advance so entries record the
        // watermark they were last updated under.
        let watermark = self.windows.advance(max_event_time);
        let mut changed: Vec<StateKey> = Vec::new();
        for delta in deltas {
            changed.extend(
                self.store
                    .merge_delta(delta, self.aggregate.as_ref(), watermark),
            );
        }
        for (_, window) in &changed {
            self.windows.observe(*window);
        }

        self.commit_increment(ranges, changed, rows_read, late_count, late_routed, watermark)
    }

    fn poll_sources(&mut self) -> Result<Batch<T>> {
        let mut ranges = BTreeMap::new();
        let mut records = Vec::new();
        for (source_id, source) in &mut self.sources {
            let since = self.tracker.committed(source_id);
            let (mut polled, end) = poll_with_backoff(
                source_id,
                source.as_mut(),
                since,
                self.config.source_retries,
                self.config.source_backoff,
            )?;
            let range = self.tracker.next_range(source_id, end.max(since));
            ranges.insert(source_id.clone(), range);
            records.append(&mut polled);
        }
        Ok(Batch::new(ranges, records))
    }

    /// Resolve key bytes and event time once per record, on the engine
    /// thread. Records without an event time get processing time, so they
    /// are never late.
    fn prepare(&self, batch: Batch<T>) -> Result<Vec<Prepared<K, T>>> {
        let now = processing_time_ms();
        let mut prepared = Vec::with_capacity(batch.records.len());
        for record in batch.records {
            let key = (self.key_fn)(&record.value);
            let key_bytes = bincode::serialize(&key)?;
            let event_time = record
                .event_time
                .or_else(|| self.event_time_fn.as_ref().map(|f| f(&record.value)))
                .unwrap_or(now);
            prepared.push(Prepared {
                key_bytes,
                key,
                event_time,
                value: record.value,
            });
        }
        Ok(prepared)
    }

    /// Fan a prepared batch out over the worker pool and collect the
    /// partition deltas at the barrier.
    fn fold_parallel(
        &self,
        prepared: Vec<Prepared<K, T>>,
        watermark_floor: EventTime,
    ) -> Vec<WorkerResult<K, T, A>> {
        let partitioner = HashPartitioner::new(self.config.partition_count);
        let mut shards: Vec<Vec<Prepared<K, T>>> = (0..self.config.partition_count)
            .map(|_| Vec::new())
            .collect();
        for record in prepared {
            let shard = partitioner.partition(&record.key_bytes);
            shards[shard].push(record);
        }

        let (sender, receiver) = crossbeam_channel::bounded(self.config.partition_count);
        let spec = self.window_spec;
        let watermark_enabled = self.config.watermark_enabled;

        thread::scope(|scope| {
            for shard in shards {
                let sender = sender.clone();
                let aggregate = Arc::clone(&self.aggregate);
                scope.spawn(move || {
                    let result = fold_partition(
                        shard,
                        spec,
                        watermark_floor,
                        watermark_enabled,
                        aggregate.as_ref(),
                    );
                    // The receiver outlives the scope; a send can only fail
                    // if the engine is already unwinding.
                    let _ = sender.send(result);
                });
            }
        });
        drop(sender);

        receiver.iter().collect()
    }

    // ── Continuous path ───────────────────────────────────────────────────────

    /// One epoch of continuous execution: records fold into state as they
    /// are polled, and the commit protocol runs at the epoch boundary.
    fn run_epoch(&mut self, epoch: Duration) -> Result<()> {
        self.scheduler.transition(SchedulerState::Running);

        let deadline = Instant::now() + epoch;
        let mut ranges: BTreeMap<SourceId, OffsetRange> = BTreeMap::new();
        for (source_id, _) in &self.sources {
            let committed = self.tracker.committed(source_id);
            ranges.insert(source_id.clone(), OffsetRange::new(committed, committed));
        }

        let mut changed: Vec<StateKey> = Vec::new();
        let mut late_routed: Vec<Record<T>> = Vec::new();
        let mut rows_read = 0usize;
        let mut late_count = 0u64;
        let mut max_event_time = EVENT_TIME_MIN;

        loop {
            let mut polled_any = false;
            for (source_id, source) in &mut self.sources {
                let range = ranges.get_mut(source_id).expect("range pre-seeded");
                let (records, end) = poll_with_backoff(
                    source_id,
                    source.as_mut(),
                    range.end,
                    self.config.source_retries,
                    self.config.source_backoff,
                )?;
                range.end = end.max(range.end);
                if records.is_empty() {
                    continue;
                }
                polled_any = true;
                rows_read += records.len();

                let now = processing_time_ms();
                let watermark_floor = self.windows.watermark();
                for record in records {
                    let key = (self.key_fn)(&record.value);
                    let key_bytes = bincode::serialize(&key)?;
                    let event_time = record
                        .event_time
                        .or_else(|| self.event_time_fn.as_ref().map(|f| f(&record.value)))
                        .unwrap_or(now);
                    max_event_time = max_event_time.max(event_time);

                    if self.windows.is_late(event_time) {
                        late_count += 1;
                        if self.config.late_policy == LateDataPolicy::SideOutput {
                            late_routed
                                .push(Record::with_event_time(record.value.clone(), event_time));
                        }
                        continue;
                    }
                    // A sliding-window record may still have closed windows
                    // among its memberships; those are filtered here.
                    let windows: Vec<TimeWindow> = self
                        .window_spec
                        .assign(event_time)
                        .into_iter()
                        .filter(|w| !self.config.watermark_enabled || w.end > watermark_floor)
                        .collect();
                    for window in windows {
                        self.store.upsert(
                            key_bytes.clone(),
                            &key,
                            window,
                            &record.value,
                            self.aggregate.as_ref(),
                            watermark_floor,
                        );
                        self.windows.observe(window);
                        changed.push((key_bytes.clone(), window));
                    }
                }
            }

            if Instant::now() >= deadline || self.scheduler.stop_requested() {
                break;
            }
            if !polled_any {
                thread::sleep(Duration::from_millis(1));
            }
        }

        if rows_read == 0 && self.config.skip_empty_increments {
            self.scheduler.transition(SchedulerState::AwaitingTrigger);
            return Ok(());
        }

        let watermark = self.windows.advance(max_event_time);
        self.commit_increment(ranges, changed, rows_read, late_count, late_routed, watermark)
    }

    // ── Shared commit tail ────────────────────────────────────────────────────

    /// Emission, sink write, checkpoint publish, durable ack, eviction —
    /// the commit barrier both execution paths funnel through.
    fn commit_increment(
        &mut self,
        ranges: BTreeMap<SourceId, OffsetRange>,
        mut changed: Vec<StateKey>,
        rows_read: usize,
        late_count: u64,
        late_routed: Vec<Record<T>>,
        watermark: EventTime,
    ) -> Result<()> {
        let increment_id = self.next_increment;
        changed.sort_unstable();
        changed.dedup();

        if late_count > 0 {
            self.windows.add_late_dropped(late_count);
            tracing::debug!(
                "increment {}: {} late records ({})",
                increment_id,
                late_count,
                match self.config.late_policy {
                    LateDataPolicy::DropAndCount => "dropped",
                    LateDataPolicy::SideOutput => "routed to side output",
                }
            );
        }
        if !late_routed.is_empty() {
            self.late_records
                .lock()
                .expect("late records poisoned")
                .extend(late_routed);
        }

        let closed = self.windows.take_closed();
        let emission = OutputCoordinator::compute_emission(
            &self.store,
            self.aggregate.as_ref(),
            self.config.output_mode,
            &closed,
            &changed,
            increment_id,
        );
        let rows_emitted = emission.rows.len();

        self.scheduler.transition(SchedulerState::Committing);

        // Sink first, checkpoint second: a crash in between replays this
        // increment under the same id, which the sink dedups. The write is
        // acknowledged as durable only after the checkpoint publishes.
        let mut attempt = 0u32;
        loop {
            match self.sink.write(&emission) {
                Ok(()) => break,
                Err(err) => {
                    attempt += 1;
                    if attempt > self.config.sink_retries {
                        return Err(EngineError::SinkWriteFailure {
                            increment_id,
                            attempts: attempt,
                            reason: err.to_string(),
                        });
                    }
                    tracing::warn!(
                        "sink write for increment {} failed (attempt {}/{}), retrying: {}",
                        increment_id,
                        attempt,
                        self.config.sink_retries,
                        err
                    );
                    thread::sleep(self.config.source_backoff * attempt);
                }
            }
        }

        // Closed windows have emitted their final row; drop their state
        // before the snapshot so the checkpoint reflects the eviction.
        self.store.evict(self.windows.watermark());

        let mut offsets = self.tracker.offsets();
        for (source_id, range) in &ranges {
            offsets.insert(source_id.clone(), range.end);
        }
        let manifest = CheckpointManifest {
            increment_id,
            offsets,
            watermark,
            state: self.store.snapshot()?,
        };
        self.checkpoints.commit(&manifest)?;

        for (source_id, range) in &ranges {
            self.tracker.commit(source_id, *range)?;
        }

        self.progress
            .lock()
            .expect("progress poisoned")
            .push(IncrementProgress {
                increment_id,
                rows_read,
                rows_emitted,
                late_dropped: late_count,
                watermark,
            });

        self.next_increment += 1;
        self.scheduler.transition(SchedulerState::AwaitingTrigger);
        Ok(())
    }
}

/// Fold one partition's records into a local delta.
///
/// Runs on a worker thread; touches nothing shared. Windows that closed in
/// a previous increment (`end <= watermark_floor`) are filtered out so a
/// sliding-window record can still contribute to its open windows; a
/// record with no open window left is late.
fn fold_partition<T, K, A, OUT>(
    shard: Vec<Prepared<K, T>>,
    spec: WindowSpec,
    watermark_floor: EventTime,
    watermark_enabled: bool,
    aggregate: &dyn Aggregate<T, A, OUT>,
) -> WorkerResult<K, T, A>
where
    K: Clone,
{
    let mut delta = StateDelta::new();
    let mut late = Vec::new();
    let mut max_event_time = EVENT_TIME_MIN;

    for record in shard {
        max_event_time = max_event_time.max(record.event_time);
        let windows: Vec<TimeWindow> = spec
            .assign(record.event_time)
            .into_iter()
            .filter(|w| !watermark_enabled || w.end > watermark_floor)
            .collect();
        if windows.is_empty() {
            late.push(Record::with_event_time(record.value, record.event_time));
            continue;
        }
        for window in windows {
            delta.add(
                record.key_bytes.clone(),
                &record.key,
                window,
                &record.value,
                aggregate,
            );
        }
    }

    WorkerResult {
        delta,
        late,
        max_event_time,
    }
}

fn processing_time_ms() -> EventTime {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as EventTime)
        .unwrap_or(0)
}

// ── EngineHandle ──────────────────────────────────────────────────────────────

/// Control surface for a started engine.
pub struct EngineHandle<T> {
    scheduler: TriggerScheduler,
    join: Mutex<Option<JoinHandle<Result<()>>>>,
    progress: Arc<Mutex<Vec<IncrementProgress>>>,
    late_records: Arc<Mutex<Vec<Record<T>>>>,
    degraded_recovery: bool,
}

impl<T: Clone> EngineHandle<T> {
    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// True when recovery had to fall back past an unreadable checkpoint.
    pub fn degraded_recovery(&self) -> bool {
        self.degraded_recovery
    }

    /// Stop after the in-flight increment commits. See
    /// [`TriggerScheduler::request_stop`].
    pub fn request_stop(&self, timeout: Duration) -> Result<()> {
        self.scheduler.request_stop(timeout)
    }

    /// Wait for the engine to reach a terminal state.
    pub fn await_termination(&self, timeout: Duration) -> Termination {
        self.scheduler.await_termination(timeout)
    }

    /// Progress reports for every committed increment so far.
    pub fn progress(&self) -> Vec<IncrementProgress> {
        self.progress.lock().expect("progress poisoned").clone()
    }

    /// Late records routed by the side-output policy.
    pub fn late_records(&self) -> Vec<Record<T>> {
        self.late_records
            .lock()
            .expect("late records poisoned")
            .clone()
    }

    /// Join the engine thread and surface its final result. Call after
    /// `await_termination` reports completion.
    pub fn join(&self) -> Result<()> {
        let handle = self
            .join
            .lock()
            .expect("join slot poisoned")
            .take()
            .ok_or_else(|| EngineError::Internal("engine already joined".to_string()))?;
        handle
            .join()
            .map_err(|_| EngineError::Internal("engine thread panicked".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStorage;
    use crate::config::OutputMode;
    use crate::output::MemorySink;
    use crate::source::MemorySource;

    struct CountAgg;

    impl Aggregate<(String, i64), i64, i64> for CountAgg {
        fn create_accumulator(&self) -> i64 {
            0
        }
        fn add(&self, acc: &mut i64, _element: &(String, i64)) {
            *acc += 1;
        }
        fn merge(&self, acc: &mut i64, other: i64) {
            *acc += other;
        }
        fn result(&self, acc: &i64) -> i64 {
            *acc
        }
    }

    type TestEngine = StreamEngine<(String, i64), String, i64, i64>;

    fn build_engine(
        config: EngineConfig,
        source: MemorySource<(String, i64)>,
        sink: MemorySink<String, i64>,
        storage: Arc<dyn CheckpointStorage>,
    ) -> Result<TestEngine> {
        StreamEngine::new(
            config,
            WindowSpec::tumbling(Duration::from_secs(10)),
            vec![("events".to_string(), Box::new(source))],
            Arc::new(|record: &(String, i64)| record.0.clone()),
            Some(Arc::new(|record: &(String, i64)| record.1)),
            Arc::new(CountAgg),
            Box::new(sink),
            storage,
        )
    }

    fn watermarked_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.watermark_enabled = true;
        config
    }

    #[test]
    fn test_once_mode_processes_everything_then_stops() {
        let source = MemorySource::new();
        for i in 0..100i64 {
            source.push((format!("k{}", i % 2), i), i * 1_000);
        }
        let sink = MemorySink::new();
        let storage = Arc::new(MemoryCheckpointStorage::new());

        let engine = build_engine(
            watermarked_config(),
            source,
            sink.clone(),
            Arc::clone(&storage) as Arc<dyn CheckpointStorage>,
        )
        .unwrap();
        let handle = engine.start().unwrap();

        assert_eq!(
            handle.await_termination(Duration::from_secs(5)),
            Termination::Completed
        );
        handle.join().unwrap();
        assert_eq!(handle.state(), SchedulerState::Stopped);

        // All 100 offsets in a single increment.
        let progress = handle.progress();
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].increment_id, 1);
        assert_eq!(progress[0].rows_read, 100);

        assert_eq!(storage.list_published().unwrap(), vec![1]);
        let manifest = storage.load(1).unwrap();
        assert_eq!(manifest.offsets.get("events"), Some(&crate::types::Offset(100)));

        // Watermark = 99_000; windows ending at or before it are emitted.
        let rows = sink.rows();
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|row| row.window.end <= 99_000));
    }

    #[test]
    fn test_sink_failure_exhausts_retries_and_fails_engine() {
        let source = MemorySource::new();
        source.push(("a".to_string(), 1), 1_000);
        let sink = MemorySink::new();
        sink.fail_next_writes(10);
        let storage = Arc::new(MemoryCheckpointStorage::new());

        let mut config = watermarked_config();
        config.sink_retries = 2;
        config.source_backoff = Duration::from_millis(1);

        let engine = build_engine(
            config,
            source,
            sink,
            Arc::clone(&storage) as Arc<dyn CheckpointStorage>,
        )
        .unwrap();
        let handle = engine.start().unwrap();

        assert_eq!(
            handle.await_termination(Duration::from_secs(5)),
            Termination::Completed
        );
        assert_eq!(handle.state(), SchedulerState::Failed);
        let err = handle.join().unwrap_err();
        assert!(matches!(
            err,
            EngineError::SinkWriteFailure {
                increment_id: 1,
                attempts: 3,
                ..
            }
        ));
        // No checkpoint was published: offsets and state did not diverge
        // from the sink.
        assert!(storage.list_published().unwrap().is_empty());
    }

    #[test]
    fn test_empty_increments_are_skipped() {
        let source: MemorySource<(String, i64)> = MemorySource::new();
        let sink = MemorySink::new();
        let storage = Arc::new(MemoryCheckpointStorage::new());

        let mut config = watermarked_config();
        config.trigger = TriggerMode::FixedInterval(Duration::from_millis(10));

        let engine = build_engine(
            config,
            source,
            sink.clone(),
            Arc::clone(&storage) as Arc<dyn CheckpointStorage>,
        )
        .unwrap();
        let handle = engine.start().unwrap();

        // Let a few empty triggers elapse, then stop.
        thread::sleep(Duration::from_millis(50));
        handle.request_stop(Duration::from_secs(5)).unwrap();
        assert_eq!(
            handle.await_termination(Duration::from_secs(5)),
            Termination::Completed
        );
        handle.join().unwrap();

        assert!(storage.list_published().unwrap().is_empty());
        assert!(handle.progress().is_empty());
        assert!(sink.batches().is_empty());
    }

    #[test]
    fn test_fixed_interval_accumulates_across_increments() {
        let source = MemorySource::new();
        source.push(("a".to_string(), 1), 1_000);
        let sink = MemorySink::new();
        let storage = Arc::new(MemoryCheckpointStorage::new());

        let mut config = watermarked_config();
        config.trigger = TriggerMode::FixedInterval(Duration::from_millis(10));
        config.output_mode = OutputMode::Update;

        let engine = build_engine(
            config,
            source.clone(),
            sink.clone(),
            Arc::clone(&storage) as Arc<dyn CheckpointStorage>,
        )
        .unwrap();
        let handle = engine.start().unwrap();

        // Second record for the same window arrives in a later increment.
        thread::sleep(Duration::from_millis(30));
        source.push(("a".to_string(), 2), 2_000);
        thread::sleep(Duration::from_millis(30));

        handle.request_stop(Duration::from_secs(5)).unwrap();
        assert_eq!(
            handle.await_termination(Duration::from_secs(5)),
            Termination::Completed
        );
        handle.join().unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        // Update mode re-emits the open window with the merged count.
        assert_eq!(batches[0].rows.len(), 1);
        assert_eq!(batches[0].rows[0].value, 1);
        assert_eq!(batches[1].rows[0].value, 2);
        assert_eq!(batches[1].rows[0].window, TimeWindow::new(0, 10_000));
    }

    #[test]
    fn test_degraded_recovery_is_surfaced() {
        let storage = Arc::new(MemoryCheckpointStorage::new());
        storage.publish_raw(1, vec![0xba, 0xad]);

        let engine = build_engine(
            watermarked_config(),
            MemorySource::new(),
            MemorySink::new(),
            Arc::clone(&storage) as Arc<dyn CheckpointStorage>,
        )
        .unwrap();
        let handle = engine.start().unwrap();
        assert!(handle.degraded_recovery());
        handle.await_termination(Duration::from_secs(5));
        handle.join().unwrap();
    }
}
