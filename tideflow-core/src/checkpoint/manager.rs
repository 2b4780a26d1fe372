use super::*;

/// Commits and recovers checkpoint manifests.
///
/// `commit` is the only place offsets, watermark, and state become durable
/// together; the engine acknowledges a sink write as durable only after
/// `commit` returns.
pub struct CheckpointManager {
    storage: Arc<dyn CheckpointStorage>,
    retained_checkpoints: usize,
}

impl CheckpointManager {
    pub fn new(storage: Arc<dyn CheckpointStorage>) -> Self {
        Self {
            storage,
            retained_checkpoints: 3,
        }
    }

    pub fn with_retained_checkpoints(mut self, retained_checkpoints: usize) -> Self {
        self.retained_checkpoints = retained_checkpoints.max(1);
        self
    }

    /// Durably commit one increment's manifest: stage, flush, publish,
    /// then garbage-collect checkpoints past the retention window.
    pub fn commit(&self, manifest: &CheckpointManifest) -> Result<()> {
        self.storage.stage(manifest)?;
        self.storage.publish(manifest.increment_id)?;
        self.storage.purge(self.retained_checkpoints)?;
        tracing::debug!(
            "published checkpoint {} (watermark={})",
            manifest.increment_id,
            manifest.watermark
        );
        Ok(())
    }

    /// Load the newest fully-published checkpoint.
    ///
    /// An unreadable newest checkpoint is skipped in favor of the previous
    /// one and reported as degraded recovery; with no readable checkpoint
    /// at all, the engine starts from the initial empty manifest.
    pub fn recover(&self) -> Result<RecoveredCheckpoint> {
        let ids = self.storage.list_published()?;
        let mut degraded = false;
        for increment_id in ids.into_iter().rev() {
            match self.storage.load(increment_id) {
                Ok(manifest) => {
                    if degraded {
                        tracing::warn!(
                            "degraded recovery: resumed from older checkpoint {}",
                            increment_id
                        );
                    }
                    return Ok(RecoveredCheckpoint { manifest, degraded });
                }
                Err(err) => {
                    tracing::warn!(
                        "checkpoint {} unreadable during recovery, falling back: {}",
                        increment_id,
                        err
                    );
                    degraded = true;
                }
            }
        }
        if degraded {
            tracing::warn!("no readable checkpoint found; starting from the initial checkpoint");
        }
        Ok(RecoveredCheckpoint {
            manifest: CheckpointManifest::initial(),
            degraded,
        })
    }
}
