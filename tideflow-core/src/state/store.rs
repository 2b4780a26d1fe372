use super::*;

/// Map key for one state entry: serialized grouping key + window.
///
/// The key bytes are the `HashMap` key for O(1) lookup; the original key
/// is kept alongside in the entry to avoid deserialization on emission.
pub type StateKey = (Vec<u8>, TimeWindow);

/// One keyed, windowed accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry<K, A> {
    pub key: K,
    pub acc: A,
    /// Watermark at the last update to this entry.
    pub last_updated: EventTime,
}

/// Partition-local accumulator deltas for one increment.
///
/// Workers fold their partition of the batch into a delta; the engine
/// merges all deltas into the [`StateStore`] at the commit barrier. One
/// accumulator is therefore never mutated concurrently.
#[derive(Debug)]
pub struct StateDelta<K, A> {
    pub entries: HashMap<StateKey, (K, A)>,
}

impl<K: Clone, A> StateDelta<K, A> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Fold one element into this delta's accumulator for `(key, window)`.
    pub fn add<IN, OUT>(
        &mut self,
        key_bytes: Vec<u8>,
        key: &K,
        window: TimeWindow,
        element: &IN,
        aggregate: &dyn Aggregate<IN, A, OUT>,
    ) {
        let entry = self
            .entries
            .entry((key_bytes, window))
            .or_insert_with(|| (key.clone(), aggregate.create_accumulator()));
        aggregate.add(&mut entry.1, element);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Clone, A> Default for StateDelta<K, A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot container for checkpointing.
#[derive(Serialize, Deserialize)]
struct SnapshotData<K, A> {
    entries: Vec<(Vec<u8>, TimeWindow, StateEntry<K, A>)>,
}

/// Keyed mapping `(grouping key, window) -> accumulator`.
///
/// Eviction is the only way state shrinks: entries whose window has closed
/// are removed after their final emission. Without a watermark nothing
/// ever closes, so growth past `warn_threshold` raises a one-shot
/// operational warning instead of being silently tolerated.
#[derive(Debug)]
pub struct StateStore<K, A> {
    entries: HashMap<StateKey, StateEntry<K, A>>,
    watermark_enabled: bool,
    warn_threshold: usize,
    growth_warned: bool,
}

impl<K: StreamData, A: StreamData> StateStore<K, A> {
    pub fn new(watermark_enabled: bool, warn_threshold: usize) -> Self {
        Self {
            entries: HashMap::new(),
            watermark_enabled,
            warn_threshold,
            growth_warned: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &StateKey) -> Option<&StateEntry<K, A>> {
        self.entries.get(key)
    }

    /// Iterate all live entries, for complete-mode emission.
    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &StateEntry<K, A>)> {
        self.entries.iter()
    }

    /// Distinct windows with live state, for rebuilding the window
    /// manager's pending index after recovery.
    pub fn windows(&self) -> impl Iterator<Item = TimeWindow> + '_ {
        self.entries.keys().map(|(_, window)| *window)
    }

    /// Apply one element to the store directly (continuous mode's
    /// per-record path).
    pub fn upsert<IN, OUT>(
        &mut self,
        key_bytes: Vec<u8>,
        key: &K,
        window: TimeWindow,
        element: &IN,
        aggregate: &dyn Aggregate<IN, A, OUT>,
        watermark: EventTime,
    ) {
        let entry = self
            .entries
            .entry((key_bytes, window))
            .or_insert_with(|| StateEntry {
                key: key.clone(),
                acc: aggregate.create_accumulator(),
                last_updated: watermark,
            });
        aggregate.add(&mut entry.acc, element);
        entry.last_updated = watermark;
        self.warn_if_unbounded();
    }

    /// Merge one partition's delta at the commit barrier.
    ///
    /// Returns the `(key, window)` entries that changed, which drives
    /// update-mode emission.
    pub fn merge_delta<IN, OUT>(
        &mut self,
        delta: StateDelta<K, A>,
        aggregate: &dyn Aggregate<IN, A, OUT>,
        watermark: EventTime,
    ) -> Vec<StateKey> {
        let mut changed = Vec::with_capacity(delta.entries.len());
        for (state_key, (key, partial)) in delta.entries {
            match self.entries.get_mut(&state_key) {
                Some(entry) => {
                    aggregate.merge(&mut entry.acc, partial);
                    entry.last_updated = watermark;
                }
                None => {
                    self.entries.insert(
                        state_key.clone(),
                        StateEntry {
                            key,
                            acc: partial,
                            last_updated: watermark,
                        },
                    );
                }
            }
            changed.push(state_key);
        }
        self.warn_if_unbounded();
        changed
    }

    /// Remove every entry whose window closed at or before `before`.
    ///
    /// Returns the removed state keys. Entries for still-open windows are
    /// untouched.
    pub fn evict(&mut self, before: EventTime) -> Vec<StateKey> {
        let evicted: Vec<StateKey> = self
            .entries
            .keys()
            .filter(|(_, window)| window.is_closed(before))
            .cloned()
            .collect();
        for key in &evicted {
            self.entries.remove(key);
        }
        evicted
    }

    /// Serialize all entries for the checkpoint manifest.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let data = SnapshotData {
            entries: self
                .entries
                .iter()
                .map(|((key_bytes, window), entry)| (key_bytes.clone(), *window, entry.clone()))
                .collect(),
        };
        Ok(bincode::serialize(&data)?)
    }

    /// Replace the store contents from a checkpoint snapshot.
    pub fn restore(&mut self, data: &[u8]) -> Result<()> {
        self.entries.clear();
        if data.is_empty() {
            return Ok(());
        }
        let snapshot: SnapshotData<K, A> = bincode::deserialize(data)?;
        for (key_bytes, window, entry) in snapshot.entries {
            self.entries.insert((key_bytes, window), entry);
        }
        Ok(())
    }

    fn warn_if_unbounded(&mut self) {
        if !self.watermark_enabled
            && !self.growth_warned
            && self.entries.len() > self.warn_threshold
        {
            self.growth_warned = true;
            tracing::warn!(
                "state store grew past {} entries with no watermark configured; \
                 nothing will ever be evicted",
                self.warn_threshold
            );
        }
    }
}
