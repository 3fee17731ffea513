//! Chunk record store
//!
//! The record store is the single source of truth for who owns a chunk's
//! download or upload: a pipeline only does I/O for a chunk after its
//! compare-and-set claim succeeded.
//!
//! Two backends are available:
//!   - **memory**: a mutex-guarded map, for tests and ephemeral nodes.
//!   - **JSON**: the same map, written to disk (temp file + rename) on every
//!     mutation before the call returns.

use anyhow::Context;
use pstore_core::config::{expand_home, RecordsConfig};
use pstore_core::{Chunk, ChunkId, DownloadStatus, StoreError, Transition, UploadStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Persistence interface for chunk records. There is no delete.
pub trait ChunkStore: Send + Sync {
    /// The existing record, or a new one with both statuses NotStarted.
    fn find_or_create(&self, id: &ChunkId) -> Result<Chunk, StoreError>;

    fn get(&self, id: &ChunkId) -> Result<Option<Chunk>, StoreError>;

    /// Upsert a whole record.
    fn save(&self, record: &Chunk) -> Result<(), StoreError>;

    fn query(&self, predicate: &dyn Fn(&Chunk) -> bool) -> Result<Vec<Chunk>, StoreError>;

    /// Compare-and-set a status. Returns the updated record; on `Conflict`
    /// nothing changes.
    fn transition(&self, id: &ChunkId, transition: &Transition) -> Result<Chunk, StoreError>;
}

// ── Memory ────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryChunkStore {
    records: Mutex<HashMap<ChunkId, Chunk>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChunkId, Chunk>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ChunkStore for MemoryChunkStore {
    fn find_or_create(&self, id: &ChunkId) -> Result<Chunk, StoreError> {
        Ok(self
            .lock()
            .entry(id.clone())
            .or_insert_with(|| Chunk::new(id.clone()))
            .clone())
    }

    fn get(&self, id: &ChunkId) -> Result<Option<Chunk>, StoreError> {
        Ok(self.lock().get(id).cloned())
    }

    fn save(&self, record: &Chunk) -> Result<(), StoreError> {
        self.lock().insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn query(&self, predicate: &dyn Fn(&Chunk) -> bool) -> Result<Vec<Chunk>, StoreError> {
        Ok(sorted(self.lock().values().filter(|&c| predicate(c))))
    }

    fn transition(&self, id: &ChunkId, transition: &Transition) -> Result<Chunk, StoreError> {
        let mut records = self.lock();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.apply(transition)?;
        Ok(record.clone())
    }
}

// ── JSON ──────────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct RecordFile {
    chunks: Vec<Chunk>,
}

/// Record store persisted to a JSON file
pub struct JsonChunkStore {
    path: PathBuf,
    records: Mutex<HashMap<ChunkId, Chunk>>,
}

impl JsonChunkStore {
    /// Load or create a store at `path`. A missing file starts empty.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let records = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading chunk records: {}", path.display()))?;
            let file: RecordFile = serde_json::from_str(&content)
                .with_context(|| format!("parsing chunk records: {}", path.display()))?;
            file.chunks
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect()
        } else {
            HashMap::new()
        };

        debug!(path = %path.display(), records = records.len(), "chunk records loaded");
        Ok(JsonChunkStore {
            path: path.to_path_buf(),
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChunkId, Chunk>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write the whole map atomically (write then rename). Called with the
    /// lock held so writers never interleave.
    fn flush(&self, records: &HashMap<ChunkId, Chunk>) -> Result<(), StoreError> {
        self.write_file(records).map_err(StoreError::Persist)
    }

    fn write_file(&self, records: &HashMap<ChunkId, Chunk>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating records dir: {}", parent.display()))?;
        }

        let file = RecordFile {
            chunks: sorted(records.values()),
        };
        let json = serde_json::to_string_pretty(&file).context("serializing chunk records")?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)
            .with_context(|| format!("writing chunk records temp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming chunk records: {}", self.path.display()))?;
        Ok(())
    }

    /// Replace one record and persist, restoring the previous value if the
    /// write fails.
    fn put_durably(
        &self,
        records: &mut HashMap<ChunkId, Chunk>,
        record: Chunk,
    ) -> Result<(), StoreError> {
        let id = record.id.clone();
        let previous = records.insert(id.clone(), record);
        if let Err(e) = self.flush(records) {
            match previous {
                Some(old) => records.insert(id, old),
                None => records.remove(&id),
            };
            return Err(e);
        }
        Ok(())
    }
}

impl ChunkStore for JsonChunkStore {
    fn find_or_create(&self, id: &ChunkId) -> Result<Chunk, StoreError> {
        let mut records = self.lock();
        if let Some(existing) = records.get(id) {
            return Ok(existing.clone());
        }
        let record = Chunk::new(id.clone());
        self.put_durably(&mut records, record.clone())?;
        Ok(record)
    }

    fn get(&self, id: &ChunkId) -> Result<Option<Chunk>, StoreError> {
        Ok(self.lock().get(id).cloned())
    }

    fn save(&self, record: &Chunk) -> Result<(), StoreError> {
        let mut records = self.lock();
        self.put_durably(&mut records, record.clone())
    }

    fn query(&self, predicate: &dyn Fn(&Chunk) -> bool) -> Result<Vec<Chunk>, StoreError> {
        Ok(sorted(self.lock().values().filter(|&c| predicate(c))))
    }

    fn transition(&self, id: &ChunkId, transition: &Transition) -> Result<Chunk, StoreError> {
        let mut records = self.lock();
        let mut record = records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.apply(transition)?;
        self.put_durably(&mut records, record.clone())?;
        Ok(record)
    }
}

fn sorted<'a>(records: impl Iterator<Item = &'a Chunk>) -> Vec<Chunk> {
    let mut out: Vec<Chunk> = records.cloned().collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

/// Open the store selected by config: JSON when a path is set, memory
/// otherwise.
pub fn open_store(config: &RecordsConfig) -> anyhow::Result<Arc<dyn ChunkStore>> {
    match &config.path {
        Some(path) => {
            let path = expand_home(path);
            info!(path = %path.display(), "opening chunk record store");
            Ok(Arc::new(JsonChunkStore::open(&path)?))
        }
        None => {
            warn!("no records path configured, chunk records will not survive a restart");
            Ok(Arc::new(MemoryChunkStore::new()))
        }
    }
}

// ── Claims ────────────────────────────────────────────────────────────────────

/// Held by whoever won a claim. If the owning future is dropped before
/// [`disarm`](Self::disarm), the claimed status is moved to Failed
/// ("cancelled") so later callers can claim again.
pub(crate) struct ClaimGuard<'a> {
    store: &'a dyn ChunkStore,
    id: &'a ChunkId,
    on_cancel: Option<Transition>,
}

impl<'a> ClaimGuard<'a> {
    pub(crate) fn download(store: &'a dyn ChunkStore, id: &'a ChunkId) -> Self {
        ClaimGuard {
            store,
            id,
            on_cancel: Some(
                Transition::download(Some(DownloadStatus::InProgress), DownloadStatus::Failed)
                    .with_error("cancelled"),
            ),
        }
    }

    pub(crate) fn upload(store: &'a dyn ChunkStore, id: &'a ChunkId) -> Self {
        ClaimGuard {
            store,
            id,
            on_cancel: Some(
                Transition::upload(Some(UploadStatus::InProgress), UploadStatus::Failed)
                    .with_error("cancelled"),
            ),
        }
    }

    /// The owner reached a final status itself.
    pub(crate) fn disarm(mut self) {
        self.on_cancel = None;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        let Some(transition) = self.on_cancel.take() else {
            return;
        };
        match self.store.transition(self.id, &transition) {
            Ok(_) => warn!(id = %self.id, field = ?transition.field(), "claim owner cancelled, marked failed"),
            Err(StoreError::Conflict { .. }) => {}
            Err(e) => warn!(id = %self.id, error = %e, "could not release cancelled claim"),
        }
    }
}

// ── Crash recovery ────────────────────────────────────────────────────────────

/// Counts of records changed by [`recover_interrupted`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub downloads_failed: usize,
    pub uploads_requeued: usize,
}

/// Downloads left InProgress by a previous run become Failed ("interrupted").
pub fn fail_interrupted_downloads(store: &dyn ChunkStore) -> Result<usize, StoreError> {
    let stuck = store.query(&|c| c.download_status == DownloadStatus::InProgress)?;
    let mut changed = 0;
    for record in stuck {
        let t = Transition::download(Some(DownloadStatus::InProgress), DownloadStatus::Failed)
            .with_error("interrupted");
        match store.transition(&record.id, &t) {
            Ok(_) => changed += 1,
            Err(StoreError::Conflict { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(changed)
}

/// Uploads left InProgress by a previous run go back to NotStarted.
pub fn requeue_interrupted_uploads(store: &dyn ChunkStore) -> Result<usize, StoreError> {
    let stuck = store.query(&|c| c.upload_status == UploadStatus::InProgress)?;
    let mut changed = 0;
    for record in stuck {
        let t = Transition::upload(Some(UploadStatus::InProgress), UploadStatus::NotStarted);
        match store.transition(&record.id, &t) {
            Ok(_) => changed += 1,
            Err(StoreError::Conflict { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(changed)
}

/// Startup crash recovery. Must run before any pipeline starts claiming.
pub fn recover_interrupted(store: &dyn ChunkStore) -> Result<RecoveryReport, StoreError> {
    let report = RecoveryReport {
        downloads_failed: fail_interrupted_downloads(store)?,
        uploads_requeued: requeue_interrupted_uploads(store)?,
    };
    if report != RecoveryReport::default() {
        info!(
            downloads_failed = report.downloads_failed,
            uploads_requeued = report.uploads_requeued,
            "recovered interrupted chunk operations"
        );
    }
    Ok(report)
}
