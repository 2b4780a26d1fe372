//! Output-mode-aware emission and the sink contract.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::config::OutputMode;
use crate::state::{Aggregate, StateKey, StateStore};
use crate::types::{IncrementId, StreamData};
use crate::window::TimeWindow;

/// One emitted result row.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedRow<K, OUT> {
    pub key: K,
    pub window: TimeWindow,
    pub value: OUT,
}

/// The rows an increment hands to the sink.
///
/// Every batch carries its `increment_id` so an idempotent sink can
/// deduplicate a retried write after a crash-and-restart.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedBatch<K, OUT> {
    pub increment_id: IncrementId,
    pub mode: OutputMode,
    pub rows: Vec<EmittedRow<K, OUT>>,
}

/// Computes the increment's visible result set under the active output
/// mode.
pub struct OutputCoordinator;

impl OutputCoordinator {
    /// Derive the rows to emit for one increment.
    ///
    /// - `Append`: rows for windows that closed this increment, once each.
    /// - `Update`: rows for every `(key, window)` whose aggregate changed
    ///   this increment, including still-open windows.
    /// - `Complete`: the full current result table.
    ///
    /// Rows are ordered by `(window, key bytes)` so emission is
    /// deterministic across runs and replays.
    pub fn compute_emission<K, A, IN, OUT>(
        store: &StateStore<K, A>,
        aggregate: &dyn Aggregate<IN, A, OUT>,
        mode: OutputMode,
        closed: &[TimeWindow],
        changed: &[StateKey],
        increment_id: IncrementId,
    ) -> EmittedBatch<K, OUT>
    where
        K: StreamData,
        A: StreamData,
    {
        let mut keyed: Vec<(StateKey, EmittedRow<K, OUT>)> = match mode {
            OutputMode::Append => {
                let closed: HashSet<TimeWindow> = closed.iter().copied().collect();
                store
                    .iter()
                    .filter(|((_, window), _)| closed.contains(window))
                    .map(|(state_key, entry)| {
                        (
                            state_key.clone(),
                            EmittedRow {
                                key: entry.key.clone(),
                                window: state_key.1,
                                value: aggregate.result(&entry.acc),
                            },
                        )
                    })
                    .collect()
            }
            OutputMode::Update => changed
                .iter()
                .filter_map(|state_key| {
                    store.get(state_key).map(|entry| {
                        (
                            state_key.clone(),
                            EmittedRow {
                                key: entry.key.clone(),
                                window: state_key.1,
                                value: aggregate.result(&entry.acc),
                            },
                        )
                    })
                })
                .collect(),
            OutputMode::Complete => store
                .iter()
                .map(|(state_key, entry)| {
                    (
                        state_key.clone(),
                        EmittedRow {
                            key: entry.key.clone(),
                            window: state_key.1,
                            value: aggregate.result(&entry.acc),
                        },
                    )
                })
                .collect(),
        };

        keyed.sort_by(|((a_bytes, a_win), _), ((b_bytes, b_win), _)| {
            (a_win, a_bytes).cmp(&(b_win, b_bytes))
        });

        EmittedBatch {
            increment_id,
            mode,
            rows: keyed.into_iter().map(|(_, row)| row).collect(),
        }
    }
}

// ── Sink ──────────────────────────────────────────────────────────────────────

/// Where emitted rows go.
///
/// The engine retries a failed write with the same `increment_id`, and
/// after a crash-and-restart the replayed increment writes again with the
/// same id — the sink must tolerate the duplicate (idempotent write or
/// dedup on id). The engine guarantees at-least-once delivery with
/// exactly-once internal state; a deduplicating sink upgrades that to
/// end-to-end exactly-once.
pub trait Sink<K, OUT>: Send {
    fn write(&mut self, batch: &EmittedBatch<K, OUT>) -> anyhow::Result<()>;
}

struct MemorySinkInner<K, OUT> {
    /// Keyed by increment id: a retried or replayed write for an id simply
    /// replaces the previous attempt.
    batches: BTreeMap<IncrementId, EmittedBatch<K, OUT>>,
    fail_writes: u32,
}

/// In-memory sink for tests and demos; idempotent per increment id.
pub struct MemorySink<K, OUT> {
    inner: Arc<Mutex<MemorySinkInner<K, OUT>>>,
}

impl<K, OUT> Clone for MemorySink<K, OUT> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Clone, OUT: Clone> MemorySink<K, OUT> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemorySinkInner {
                batches: BTreeMap::new(),
                fail_writes: 0,
            })),
        }
    }

    /// Make the next `n` writes fail, to exercise the retry path.
    pub fn fail_next_writes(&self, n: u32) {
        self.inner.lock().expect("memory sink poisoned").fail_writes = n;
    }

    /// All batches written so far, in increment order.
    pub fn batches(&self) -> Vec<EmittedBatch<K, OUT>> {
        self.inner
            .lock()
            .expect("memory sink poisoned")
            .batches
            .values()
            .cloned()
            .collect()
    }

    /// All rows across batches, in increment order.
    pub fn rows(&self) -> Vec<EmittedRow<K, OUT>> {
        self.batches()
            .into_iter()
            .flat_map(|batch| batch.rows)
            .collect()
    }
}

impl<K: Clone, OUT: Clone> Default for MemorySink<K, OUT> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, OUT> Sink<K, OUT> for MemorySink<K, OUT>
where
    K: Clone + Send + 'static,
    OUT: Clone + Send + 'static,
{
    fn write(&mut self, batch: &EmittedBatch<K, OUT>) -> anyhow::Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?;
        if inner.fail_writes > 0 {
            inner.fail_writes -= 1;
            anyhow::bail!("injected sink failure");
        }
        inner.batches.insert(batch.increment_id, batch.clone());
        Ok(())
    }
}
