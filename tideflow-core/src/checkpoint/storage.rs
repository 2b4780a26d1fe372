use super::*;

/// Durable manifest storage with atomic publish semantics.
///
/// `stage` must leave the manifest invisible to `list_published`;
/// `publish` flips visibility atomically. A staged-but-unpublished
/// manifest must survive neither listing nor recovery.
pub trait CheckpointStorage: Send + Sync {
    fn stage(&self, manifest: &CheckpointManifest) -> Result<()>;
    fn publish(&self, increment_id: IncrementId) -> Result<()>;
    fn load(&self, increment_id: IncrementId) -> Result<CheckpointManifest>;
    /// Published increment ids in ascending order.
    fn list_published(&self) -> Result<Vec<IncrementId>>;
    /// Delete all but the newest `keep_last_n` published checkpoints.
    fn purge(&self, keep_last_n: usize) -> Result<()>;
}

// ── In-memory storage ─────────────────────────────────────────────────────────

/// In-memory checkpoint storage for tests and ephemeral pipelines.
///
/// The staged/published split is modelled explicitly so tests can simulate
/// a crash between staging and publish.
#[derive(Default)]
pub struct MemoryCheckpointStorage {
    staged: Mutex<HashMap<IncrementId, Vec<u8>>>,
    published: Mutex<BTreeMap<IncrementId, Vec<u8>>>,
}

impl MemoryCheckpointStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish raw bytes directly, bypassing staging. Lets tests plant a
    /// corrupt "latest" checkpoint.
    pub fn publish_raw(&self, increment_id: IncrementId, bytes: Vec<u8>) {
        self.published
            .lock()
            .expect("published lock poisoned")
            .insert(increment_id, bytes);
    }

    /// Ids staged but not yet published.
    pub fn staged_ids(&self) -> Vec<IncrementId> {
        let mut ids: Vec<_> = self
            .staged
            .lock()
            .expect("staged lock poisoned")
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl CheckpointStorage for MemoryCheckpointStorage {
    fn stage(&self, manifest: &CheckpointManifest) -> Result<()> {
        let bytes = bincode::serialize(manifest)?;
        self.staged
            .lock()
            .map_err(|_| EngineError::Internal("staged lock poisoned".to_string()))?
            .insert(manifest.increment_id, bytes);
        Ok(())
    }

    fn publish(&self, increment_id: IncrementId) -> Result<()> {
        let bytes = self
            .staged
            .lock()
            .map_err(|_| EngineError::Internal("staged lock poisoned".to_string()))?
            .remove(&increment_id)
            .ok_or_else(|| {
                EngineError::Internal(format!("checkpoint {increment_id} was never staged"))
            })?;
        self.published
            .lock()
            .map_err(|_| EngineError::Internal("published lock poisoned".to_string()))?
            .insert(increment_id, bytes);
        Ok(())
    }

    fn load(&self, increment_id: IncrementId) -> Result<CheckpointManifest> {
        let guard = self
            .published
            .lock()
            .map_err(|_| EngineError::Internal("published lock poisoned".to_string()))?;
        let bytes = guard.get(&increment_id).ok_or_else(|| {
            EngineError::CheckpointCorrupt {
                increment_id,
                reason: "not published".to_string(),
            }
        })?;
        bincode::deserialize(bytes).map_err(|err| EngineError::CheckpointCorrupt {
            increment_id,
            reason: err.to_string(),
        })
    }

    fn list_published(&self) -> Result<Vec<IncrementId>> {
        Ok(self
            .published
            .lock()
            .map_err(|_| EngineError::Internal("published lock poisoned".to_string()))?
            .keys()
            .copied()
            .collect())
    }

    fn purge(&self, keep_last_n: usize) -> Result<()> {
        let mut guard = self
            .published
            .lock()
            .map_err(|_| EngineError::Internal("published lock poisoned".to_string()))?;
        while guard.len() > keep_last_n {
            let oldest = *guard.keys().next().expect("non-empty map");
            guard.remove(&oldest);
        }
        Ok(())
    }
}

// ── Filesystem storage ────────────────────────────────────────────────────────

/// Filesystem checkpoint storage.
///
/// Layout: one `chk-{id}` file per published checkpoint under the base
/// directory. Staging writes `chk-{id}.staging` and flushes it; publish is
/// a `rename` to the final name, which is atomic on POSIX filesystems.
/// `list_published` ignores staging files, so a crash before the rename
/// leaves no visible checkpoint.
pub struct FsCheckpointStorage {
    base_path: PathBuf,
}

impl FsCheckpointStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    fn published_path(&self, increment_id: IncrementId) -> PathBuf {
        self.base_path.join(format!("chk-{increment_id}"))
    }

    fn staging_path(&self, increment_id: IncrementId) -> PathBuf {
        self.base_path.join(format!("chk-{increment_id}.staging"))
    }
}

impl CheckpointStorage for FsCheckpointStorage {
    fn stage(&self, manifest: &CheckpointManifest) -> Result<()> {
        use std::io::Write;

        let bytes = bincode::serialize(manifest)?;
        let path = self.staging_path(manifest.increment_id);
        let mut file = fs::File::create(&path)?;
        file.write_all(&bytes)?;
        // Flush to disk before the publish rename; the swap must never
        // point at an unflushed manifest.
        file.sync_all()?;
        Ok(())
    }

    fn publish(&self, increment_id: IncrementId) -> Result<()> {
        let staging = self.staging_path(increment_id);
        if !staging.exists() {
            return Err(EngineError::Internal(format!(
                "checkpoint {increment_id} was never staged"
            )));
        }
        fs::rename(staging, self.published_path(increment_id))?;
        Ok(())
    }

    fn load(&self, increment_id: IncrementId) -> Result<CheckpointManifest> {
        let bytes = fs::read(self.published_path(increment_id)).map_err(|err| {
            EngineError::CheckpointCorrupt {
                increment_id,
                reason: err.to_string(),
            }
        })?;
        bincode::deserialize(&bytes).map_err(|err| EngineError::CheckpointCorrupt {
            increment_id,
            reason: err.to_string(),
        })
    }

    fn list_published(&self) -> Result<Vec<IncrementId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id_part) = name.strip_prefix("chk-") {
                // Skip `chk-{id}.staging` leftovers from interrupted commits.
                if let Ok(id) = id_part.parse::<IncrementId>() {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn purge(&self, keep_last_n: usize) -> Result<()> {
        let ids = self.list_published()?;
        if ids.len() <= keep_last_n {
            return Ok(());
        }
        let purge_count = ids.len() - keep_last_n;
        for increment_id in ids.into_iter().take(purge_count) {
            let path = self.published_path(increment_id);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}
