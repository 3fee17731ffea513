//! Upload pipeline: local staged chunk → ledger
//!
//! `stage` is how locally produced bytes enter the system; the scheduler
//! later drives every staged chunk through `upload_chunk`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pstore_chunks::{id_of, verify};
use pstore_core::config::StorageConfig;
use pstore_core::{Chunk, ChunkId, DownloadStatus, StoreError, Transition, UploadStatus};
use pstore_storage::{EntryRef, Ledger};
use tracing::{debug, info, warn};

use crate::cache::ChunkCache;
use crate::download::bounded;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics::PipelineMetrics;
use crate::records::{requeue_interrupted_uploads, ChunkStore, ClaimGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// This call published the chunk.
    Published(EntryRef),
    /// Nothing to do; the chunk was uploaded earlier.
    AlreadyUploaded,
    /// Another caller holds the upload claim.
    InFlight,
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Upper bound on each ledger publish
    pub backend_timeout: Duration,
}

impl UploadOptions {
    pub fn from_config(storage: &StorageConfig) -> Self {
        UploadOptions {
            backend_timeout: Duration::from_secs(storage.backend_timeout_secs),
        }
    }
}

impl Default for UploadOptions {
    fn default() -> Self {
        UploadOptions::from_config(&StorageConfig::default())
    }
}

pub struct UploadPipeline {
    store: Arc<dyn ChunkStore>,
    ledger: Arc<dyn Ledger>,
    cache: ChunkCache,
    options: UploadOptions,
    metrics: PipelineMetrics,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        ledger: Arc<dyn Ledger>,
        cache: ChunkCache,
        options: UploadOptions,
    ) -> Self {
        UploadPipeline {
            store,
            ledger,
            cache,
            options,
            metrics: PipelineMetrics::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Register locally produced bytes as a chunk and return its id.
    ///
    /// The bytes are written to the cache and the download side is marked
    /// Completed, since a verified local copy now exists. The upload status
    /// is left alone.
    pub async fn stage(&self, data: &[u8]) -> PipelineResult<ChunkId> {
        let id = id_of(data);
        let record = self.store.find_or_create(&id)?;

        match record.download_status {
            DownloadStatus::Completed => {
                debug!(id = %id, "chunk already staged");
                return Ok(id);
            }
            DownloadStatus::InProgress => {
                // A download owns the record; it will land identical bytes.
                debug!(id = %id, "chunk download in progress, not restaging");
                return Ok(id);
            }
            DownloadStatus::NotStarted | DownloadStatus::Failed => {}
        }

        self.cache.write(&id, data).await?;
        let completed = Transition::download(Some(record.download_status), DownloadStatus::Completed)
            .with_size(data.len() as u64);
        match self.store.transition(&id, &completed) {
            Ok(_) | Err(StoreError::Conflict { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        debug!(id = %id, bytes = data.len(), "chunk staged");
        Ok(id)
    }

    /// Publish chunk `id` to the ledger.
    ///
    /// The cached bytes are re-verified first so on-disk corruption is never
    /// published. On failure, or if this future is dropped mid-publish, the
    /// record is left Failed with `last_error`.
    pub async fn upload_chunk(&self, id: &ChunkId) -> PipelineResult<UploadOutcome> {
        let record = self
            .store
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        match record.upload_status {
            UploadStatus::Uploaded => return Ok(UploadOutcome::AlreadyUploaded),
            UploadStatus::InProgress => return Ok(UploadOutcome::InFlight),
            UploadStatus::NotStarted | UploadStatus::Failed => {}
        }

        let claim = Transition::upload(Some(record.upload_status), UploadStatus::InProgress);
        let record = match self.store.transition(id, &claim) {
            Ok(record) => record,
            Err(StoreError::Conflict { .. }) => return Ok(UploadOutcome::InFlight),
            Err(e) => return Err(e.into()),
        };

        let guard = ClaimGuard::upload(self.store.as_ref(), id);
        let published = self.publish_claimed(&record).await;
        guard.disarm();

        match published {
            Ok(entry) => {
                self.store.transition(
                    id,
                    &Transition::upload(Some(UploadStatus::InProgress), UploadStatus::Uploaded),
                )?;
                self.metrics.chunks_uploaded.inc();
                info!(id = %id, entry = %entry, attempt = record.upload_attempts, "chunk uploaded");
                Ok(UploadOutcome::Published(entry))
            }
            Err(e) => {
                self.metrics.upload_failures.inc();
                warn!(id = %id, attempt = record.upload_attempts, error = %e, "chunk upload failed");
                let failed =
                    Transition::upload(Some(UploadStatus::InProgress), UploadStatus::Failed)
                        .with_error(e.to_string());
                if let Err(store_err) = self.store.transition(id, &failed) {
                    warn!(id = %id, error = %store_err, "could not record upload failure");
                }
                Err(e)
            }
        }
    }

    async fn publish_claimed(&self, record: &Chunk) -> PipelineResult<EntryRef> {
        let id = &record.id;
        if record.download_status != DownloadStatus::Completed {
            return Err(PipelineError::Other(anyhow::anyhow!(
                "chunk {id} has no verified local copy (download status {})",
                record.download_status
            )));
        }

        let data = self.cache.read(id).await?;
        verify(&data, id)?;

        bounded(
            self.options.backend_timeout,
            || format!("publishing {id}"),
            self.ledger.publish(id, Bytes::from(data)),
        )
        .await
    }

    /// Re-enqueue uploads a previous run left InProgress.
    pub fn resume(&self) -> PipelineResult<usize> {
        Ok(requeue_interrupted_uploads(self.store.as_ref())?)
    }

    /// Records the scheduler should drive: never attempted, or failed with
    /// attempts to spare.
    pub fn pending(&self, max_retries: u32) -> PipelineResult<Vec<Chunk>> {
        Ok(self.store.query(&|c| match c.upload_status {
            UploadStatus::NotStarted => true,
            UploadStatus::Failed => c.upload_attempts < max_retries,
            _ => false,
        })?)
    }
}
