//! Fluent query construction and the running-query handle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tideflow_core::checkpoint::{CheckpointStorage, FsCheckpointStorage, MemoryCheckpointStorage};
use tideflow_core::config::{EngineConfig, LateDataPolicy, OutputMode, TriggerMode};
use tideflow_core::engine::{
    EngineHandle, EventTimeFn, IncrementProgress, KeyFn, StreamEngine,
};
use tideflow_core::error::{EngineError, Result, Termination};
use tideflow_core::output::Sink;
use tideflow_core::source::SourceAdapter;
use tideflow_core::state::Aggregate;
use tideflow_core::trigger::SchedulerState;
use tideflow_core::types::{EventTime, Record, SourceId, StreamData};
use tideflow_core::window::WindowSpec;

enum CheckpointTarget {
    Memory,
    Directory(PathBuf),
    Custom(Arc<dyn CheckpointStorage>),
}

/// Builder for a streaming query.
///
/// Enumerates exactly the recognized configuration surface; everything is
/// validated eagerly when [`start`](AggregatedQuery::start) runs, so a bad
/// combination (for example complete output without a watermark) fails
/// before any data moves.
pub struct QueryBuilder<T, K> {
    name: String,
    config: EngineConfig,
    window: Option<WindowSpec>,
    sources: Vec<(SourceId, Box<dyn SourceAdapter<T>>)>,
    key_fn: Option<KeyFn<T, K>>,
    event_time_fn: Option<EventTimeFn<T>>,
    checkpoint: CheckpointTarget,
}

impl<T, K> QueryBuilder<T, K>
where
    T: StreamData,
    K: StreamData,
{
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: EngineConfig::default(),
            window: None,
            sources: Vec::new(),
            key_fn: None,
            event_time_fn: None,
            checkpoint: CheckpointTarget::Memory,
        }
    }

    /// Register a source under `id`. Offsets are tracked per id.
    pub fn source(mut self, id: &str, source: impl SourceAdapter<T> + 'static) -> Self {
        self.sources.push((id.to_string(), Box::new(source)));
        self
    }

    /// Grouping key for the aggregation.
    pub fn key_by(mut self, key_fn: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    /// Configure the watermark column: an event-time extractor plus the
    /// allowed lateness. Without this the query runs on processing time,
    /// windows never close, and state never shrinks.
    pub fn watermark(
        mut self,
        event_time_fn: impl Fn(&T) -> EventTime + Send + Sync + 'static,
        allowed_lateness: Duration,
    ) -> Self {
        self.event_time_fn = Some(Arc::new(event_time_fn));
        self.config.watermark_enabled = true;
        self.config.allowed_lateness = allowed_lateness;
        self
    }

    pub fn window(mut self, spec: WindowSpec) -> Self {
        self.window = Some(spec);
        self
    }

    pub fn trigger(mut self, trigger: TriggerMode) -> Self {
        self.config.trigger = trigger;
        self
    }

    pub fn output_mode(mut self, mode: OutputMode) -> Self {
        self.config.output_mode = mode;
        self
    }

    pub fn late_policy(mut self, policy: LateDataPolicy) -> Self {
        self.config.late_policy = policy;
        self
    }

    pub fn partition_count(mut self, partitions: usize) -> Self {
        self.config.partition_count = partitions;
        self
    }

    /// Persist checkpoints under `path`; restarting a query with the same
    /// location resumes from its last published checkpoint.
    pub fn checkpoint_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint = CheckpointTarget::Directory(path.into());
        self
    }

    /// Use a caller-provided checkpoint storage backend.
    pub fn checkpoint_storage(mut self, storage: Arc<dyn CheckpointStorage>) -> Self {
        self.checkpoint = CheckpointTarget::Custom(storage);
        self
    }

    /// Attach a custom aggregate.
    pub fn aggregate<A, OUT>(
        self,
        aggregate: impl Aggregate<T, A, OUT> + 'static,
    ) -> AggregatedQuery<T, K, A, OUT>
    where
        A: StreamData,
        OUT: StreamData,
    {
        AggregatedQuery {
            builder: self,
            aggregate: Arc::new(aggregate),
        }
    }

    /// Attach a registered aggregate by name, folding the value extracted
    /// by `value_fn`. Unknown names fail here, at build time.
    pub fn aggregate_named(
        self,
        registry: &crate::AggregateRegistry,
        name: &str,
        value_fn: impl Fn(&T) -> i64 + Send + Sync + 'static,
    ) -> Result<AggregatedQuery<T, K, i64, i64>>
    where
        T: Sync,
    {
        let inner = registry.resolve(name)?;
        Ok(AggregatedQuery {
            builder: self,
            aggregate: Arc::new(crate::MappedAggregate::new(inner, Arc::new(value_fn))),
        })
    }
}

/// A query with its aggregate attached; add the sink and start it.
pub struct AggregatedQuery<T, K, A, OUT> {
    builder: QueryBuilder<T, K>,
    aggregate: Arc<dyn Aggregate<T, A, OUT>>,
}

impl<T, K, A, OUT> AggregatedQuery<T, K, A, OUT>
where
    T: StreamData,
    K: StreamData,
    A: StreamData,
    OUT: StreamData,
{
    /// Validate the whole configuration, recover from the checkpoint
    /// location, and start the engine thread.
    pub fn start(self, sink: impl Sink<K, OUT> + 'static) -> Result<StreamingQuery<T>> {
        let builder = self.builder;
        let key_fn = builder.key_fn.ok_or_else(|| {
            EngineError::InvalidConfig("key_by is required before start".to_string())
        })?;
        let window = builder.window.ok_or_else(|| {
            EngineError::InvalidConfig("a window spec is required before start".to_string())
        })?;
        let storage: Arc<dyn CheckpointStorage> = match builder.checkpoint {
            CheckpointTarget::Memory => Arc::new(MemoryCheckpointStorage::new()),
            CheckpointTarget::Directory(path) => Arc::new(FsCheckpointStorage::new(path)?),
            CheckpointTarget::Custom(storage) => storage,
        };

        let engine = StreamEngine::new(
            builder.config,
            window,
            builder.sources,
            key_fn,
            builder.event_time_fn,
            self.aggregate,
            Box::new(sink),
            storage,
        )?;
        let handle = engine.start()?;
        tracing::info!("query '{}' started", builder.name);
        Ok(StreamingQuery {
            name: builder.name,
            handle,
        })
    }
}

/// Handle to a running query.
pub struct StreamingQuery<T> {
    name: String,
    handle: EngineHandle<T>,
}

impl<T: Clone> StreamingQuery<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SchedulerState {
        self.handle.state()
    }

    /// True when recovery had to skip an unreadable checkpoint.
    pub fn degraded_recovery(&self) -> bool {
        self.handle.degraded_recovery()
    }

    /// Ask the engine to stop once the in-flight increment has committed.
    pub fn request_stop(&self, timeout: Duration) -> Result<()> {
        self.handle.request_stop(timeout)
    }

    /// Wait for the engine to terminate.
    pub fn await_termination(&self, timeout: Duration) -> Termination {
        self.handle.await_termination(timeout)
    }

    /// Per-increment progress reports.
    pub fn progress(&self) -> Vec<IncrementProgress> {
        self.handle.progress()
    }

    /// Late records captured by the side-output policy.
    pub fn late_records(&self) -> Vec<Record<T>> {
        self.handle.late_records()
    }

    /// Stop, wait for termination, and surface the engine's final result.
    pub fn stop(&self, timeout: Duration) -> Result<()> {
        self.request_stop(timeout)?;
        match self.await_termination(timeout) {
            Termination::Completed => self.handle.join(),
            Termination::TimedOut => Err(EngineError::StopTimeout(timeout)),
        }
    }

    /// Join the engine thread after it has terminated on its own (for
    /// example a `Once` query), surfacing any failure.
    pub fn join(&self) -> Result<()> {
        self.handle.join()
    }
}
