//! Source contract and offset bookkeeping.
//!
//! A source is anything that can replay records from a previously returned
//! offset. The engine's baseline assumption is at-least-once source
//! semantics: after a crash, the engine re-polls from the last committed
//! offset and the source must hand back the same records.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::types::{Offset, OffsetRange, Record, SourceId};

/// Pull interface over an external stream of records.
///
/// `poll(since)` returns every record with an offset in `[since, end)`
/// together with `end`, the first offset not yet produced. Implementations
/// must be re-playable from any previously returned offset.
///
/// Errors are treated as transient: the engine retries with exponential
/// backoff and only fails the increment (without advancing offsets) once
/// retries are exhausted.
pub trait SourceAdapter<T>: Send {
    fn poll(&mut self, since: Offset) -> anyhow::Result<(Vec<Record<T>>, Offset)>;
}

/// Records, per source, the last offset included in a committed checkpoint.
///
/// `commit` is deliberately `pub(crate)`: offsets may only advance as part
/// of the checkpoint commit protocol, and keeping the mutator crate-private
/// makes a stray call a compile error instead of a runtime convention.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    committed: BTreeMap<SourceId, Offset>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the tracker from a recovered checkpoint's offsets.
    pub fn restore(offsets: BTreeMap<SourceId, Offset>) -> Self {
        Self { committed: offsets }
    }

    /// Last committed offset for `source`, or `Offset(0)` if none.
    pub fn committed(&self, source: &str) -> Offset {
        self.committed.get(source).copied().unwrap_or_default()
    }

    /// The range a new increment should pull for `source`, given the
    /// source's current end offset. Empty when no new data is available.
    pub fn next_range(&self, source: &str, latest_end: Offset) -> OffsetRange {
        OffsetRange::new(self.committed(source), latest_end)
    }

    /// Snapshot of all committed offsets, for the checkpoint manifest.
    pub fn offsets(&self) -> BTreeMap<SourceId, Offset> {
        self.committed.clone()
    }

    /// Advance the committed offset for `source` to `range.end`.
    ///
    /// Only reachable from the engine's checkpoint commit path. Committed
    /// ranges must be gap-free: `range.begin` has to equal the current
    /// committed offset.
    pub(crate) fn commit(&mut self, source: &str, range: OffsetRange) -> Result<()> {
        let current = self.committed(source);
        if range.begin != current {
            return Err(EngineError::Internal(format!(
                "offset commit for '{source}' is not contiguous: committed={current}, range={range}"
            )));
        }
        if range.end < current {
            return Err(EngineError::Internal(format!(
                "offset commit for '{source}' would regress: committed={current}, range={range}"
            )));
        }
        self.committed.insert(source.to_string(), range.end);
        Ok(())
    }
}

/// Poll `source` with exponential backoff.
///
/// Retries transient failures up to `retries` times, doubling the delay
/// from `backoff_base` per attempt. Exhausted retries surface as
/// [`EngineError::SourceUnavailable`]; offsets have not advanced.
pub fn poll_with_backoff<T>(
    source_id: &str,
    source: &mut dyn SourceAdapter<T>,
    since: Offset,
    retries: u32,
    backoff_base: Duration,
) -> Result<(Vec<Record<T>>, Offset)> {
    let mut attempt = 0u32;
    loop {
        match source.poll(since) {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempt += 1;
                if attempt > retries {
                    return Err(EngineError::SourceUnavailable {
                        source_id: source_id.to_string(),
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                }
                let delay = backoff_base * 2u32.saturating_pow(attempt - 1);
                tracing::warn!(
                    "source '{}' poll failed (attempt {}/{}), retrying in {:?}: {}",
                    source_id,
                    attempt,
                    retries,
                    delay,
                    err
                );
                std::thread::sleep(delay);
            }
        }
    }
}

// ── MemorySource ──────────────────────────────────────────────────────────────

struct MemorySourceInner<T> {
    records: Vec<Record<T>>,
    fail_polls: u32,
}

/// Replayable in-memory source for tests and demos.
///
/// Every pushed record occupies one offset; `poll(since)` replays from any
/// earlier offset, which is exactly the contract the engine's recovery
/// path depends on. `fail_next_polls` injects transient failures to
/// exercise the backoff path.
#[derive(Clone)]
pub struct MemorySource<T> {
    inner: Arc<Mutex<MemorySourceInner<T>>>,
}

impl<T: Clone> MemorySource<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemorySourceInner {
                records: Vec::new(),
                fail_polls: 0,
            })),
        }
    }

    /// Append a record with an event time.
    pub fn push(&self, value: T, event_time: crate::types::EventTime) {
        self.push_record(Record::with_event_time(value, event_time));
    }

    pub fn push_record(&self, record: Record<T>) {
        self.inner.lock().expect("memory source poisoned").records.push(record);
    }

    /// Make the next `n` polls fail, to exercise retry/backoff.
    pub fn fail_next_polls(&self, n: u32) {
        self.inner.lock().expect("memory source poisoned").fail_polls = n;
    }
}

impl<T: Clone> Default for MemorySource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> SourceAdapter<T> for MemorySource<T> {
    fn poll(&mut self, since: Offset) -> anyhow::Result<(Vec<Record<T>>, Offset)> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory source poisoned"))?;
        if inner.fail_polls > 0 {
            inner.fail_polls -= 1;
            anyhow::bail!("injected poll failure");
        }
        let end = Offset(inner.records.len() as u64);
        let begin = (since.0 as usize).min(inner.records.len());
        let records = inner.records[begin..].to_vec();
        Ok((records, end))
    }
}
