use super::*;

/// Persisted snapshot of one committed increment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointManifest {
    pub increment_id: IncrementId,
    /// Last offset included in this increment, per source.
    pub offsets: BTreeMap<SourceId, Offset>,
    pub watermark: EventTime,
    /// Serialized state-store snapshot.
    pub state: Vec<u8>,
}

impl CheckpointManifest {
    /// The empty checkpoint a fresh engine starts from.
    pub fn initial() -> Self {
        Self {
            increment_id: 0,
            offsets: BTreeMap::new(),
            watermark: EVENT_TIME_MIN,
            state: Vec::new(),
        }
    }
}

/// Result of [`CheckpointManager::recover`].
#[derive(Debug, Clone)]
pub struct RecoveredCheckpoint {
    pub manifest: CheckpointManifest,
    /// True when the newest published checkpoint was unreadable and an
    /// older one (or the initial empty checkpoint) was used instead.
    pub degraded: bool,
}
