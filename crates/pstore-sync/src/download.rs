//! Download pipeline: ledger → verify → cache, one owner per chunk id
//!
//! ```text
//!            claim (CAS)          verified match
//! NotStarted ───────────► InProgress ───────────► Completed
//!   Failed   ───────────►     │
//! Completed ─(cache bad)─►    └── no match / transport / timeout ──► Failed
//! ```
//!
//! Callers that lose the claim poll the record with a backoff until the
//! owner finishes, then serve from the cache (or report the owner's failure).
//! An owner dropped mid-fetch leaves the record Failed ("cancelled").

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use bytes::Bytes;
use pstore_chunks::verify;
use pstore_core::config::{DownloadConfig, StorageConfig};
use pstore_core::{ChunkId, DownloadStatus, StoreError, Transition};
use pstore_storage::{Ledger, LedgerError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::ChunkCache;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics::PipelineMetrics;
use crate::records::{fail_interrupted_downloads, ChunkStore, ClaimGuard};

/// Text renderings offered by [`DownloadPipeline::get_chunk_encoded`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Hex,
    Base64,
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Delay between re-checks while another caller owns the fetch
    pub backoff: Duration,
    /// Upper bound on waiting for another caller's fetch
    pub wait_timeout: Duration,
    /// Upper bound on each ledger call
    pub backend_timeout: Duration,
}

impl DownloadOptions {
    pub fn from_config(download: &DownloadConfig, storage: &StorageConfig) -> Self {
        DownloadOptions {
            backoff: Duration::from_millis(download.backoff_ms),
            wait_timeout: Duration::from_secs(download.wait_timeout_secs),
            backend_timeout: Duration::from_secs(storage.backend_timeout_secs),
        }
    }
}

impl Default for DownloadOptions {
    fn default() -> Self {
        DownloadOptions::from_config(&DownloadConfig::default(), &StorageConfig::default())
    }
}

pub struct DownloadPipeline {
    store: Arc<dyn ChunkStore>,
    ledger: Arc<dyn Ledger>,
    cache: ChunkCache,
    options: DownloadOptions,
    metrics: PipelineMetrics,
}

impl DownloadPipeline {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        ledger: Arc<dyn Ledger>,
        cache: ChunkCache,
        options: DownloadOptions,
    ) -> Self {
        DownloadPipeline {
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

    /// Mark downloads interrupted by a crash as Failed. Run once at startup.
    pub fn recover(&self) -> PipelineResult<usize> {
        Ok(fail_interrupted_downloads(self.store.as_ref())?)
    }

    /// Return the verified bytes of chunk `id`.
    ///
    /// With `use_cache`, a Completed chunk is served from the local cache
    /// without touching the ledger.
    pub async fn get_chunk(&self, id: &ChunkId, use_cache: bool) -> PipelineResult<Bytes> {
        let mut use_cache = use_cache;
        let mut waited = false;
        let mut deadline: Option<Instant> = None;

        loop {
            let record = self.store.find_or_create(id)?;

            match record.download_status {
                DownloadStatus::Completed if use_cache => match self.cache.read(id).await {
                    Ok(data) => {
                        self.metrics.cache_hits.inc();
                        debug!(id = %id, bytes = data.len(), "chunk served from cache");
                        return Ok(Bytes::from(data));
                    }
                    Err(e) => {
                        warn!(id = %id, error = %format!("{e:#}"), "cached chunk unreadable, fetching again");
                    }
                },
                DownloadStatus::InProgress => {
                    let deadline =
                        *deadline.get_or_insert_with(|| Instant::now() + self.options.wait_timeout);
                    if Instant::now() >= deadline {
                        return Err(PipelineError::timeout(format!(
                            "waiting for another fetch of {id}"
                        )));
                    }
                    tokio::time::sleep(self.options.backoff).await;
                    use_cache = true;
                    waited = true;
                    continue;
                }
                DownloadStatus::Failed if waited => {
                    return Err(PipelineError::FetchFailed {
                        id: id.clone(),
                        reason: record
                            .last_error
                            .unwrap_or_else(|| "unknown error".to_string()),
                    });
                }
                _ => {}
            }

            let claim =
                Transition::download(Some(record.download_status), DownloadStatus::InProgress);
            match self.store.transition(id, &claim) {
                Ok(_) => {
                    let guard = ClaimGuard::download(self.store.as_ref(), id);
                    let result = self.fetch_claimed(id).await;
                    guard.disarm();
                    return result;
                }
                Err(StoreError::Conflict { .. }) => {
                    // Someone else owns the fetch now; follow their result.
                    use_cache = true;
                    waited = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// [`get_chunk`](Self::get_chunk), rendered as text.
    pub async fn get_chunk_encoded(
        &self,
        id: &ChunkId,
        encoding: Encoding,
        use_cache: bool,
    ) -> PipelineResult<String> {
        let data = self.get_chunk(id, use_cache).await?;
        match encoding {
            Encoding::Utf8 => String::from_utf8(data.to_vec()).map_err(|e| {
                PipelineError::Other(anyhow::anyhow!("chunk {id} is not valid UTF-8: {e}"))
            }),
            Encoding::Hex => Ok(hex::encode(&data)),
            Encoding::Base64 => Ok(base64::engine::general_purpose::STANDARD.encode(&data)),
        }
    }

    /// Runs only after this caller's claim succeeded. Every exit leaves the
    /// record Completed or Failed.
    async fn fetch_claimed(&self, id: &ChunkId) -> PipelineResult<Bytes> {
        match self.fetch_and_store(id).await {
            Ok(data) => {
                self.metrics.chunks_downloaded.inc();
                Ok(data)
            }
            Err(e) => {
                self.metrics.download_failures.inc();
                warn!(id = %id, error = %e, "chunk download failed");
                let failed =
                    Transition::download(Some(DownloadStatus::InProgress), DownloadStatus::Failed)
                        .with_error(e.to_string());
                if let Err(store_err) = self.store.transition(id, &failed) {
                    warn!(id = %id, error = %store_err, "could not record download failure");
                }
                Err(e)
            }
        }
    }

    async fn fetch_and_store(&self, id: &ChunkId) -> PipelineResult<Bytes> {
        let timeout = self.options.backend_timeout;
        let entries = bounded(
            timeout,
            || format!("querying ledger for {id}"),
            self.ledger.query_by_tag(id),
        )
        .await?;

        for entry in &entries {
            let data = bounded(
                timeout,
                || format!("fetching ledger entry {entry}"),
                self.ledger.fetch_raw(entry),
            )
            .await?;

            if let Err(mismatch) = verify(&data, id) {
                self.metrics.verification_mismatches.inc();
                warn!(id = %id, entry = %entry, actual = %mismatch.actual, "ledger candidate failed verification, skipping");
                continue;
            }

            self.cache.write(id, &data).await?;
            let done =
                Transition::download(Some(DownloadStatus::InProgress), DownloadStatus::Completed)
                    .with_size(data.len() as u64);
            self.store.transition(id, &done)?;

            info!(id = %id, entry = %entry, bytes = data.len(), "chunk downloaded");
            return Ok(data);
        }

        Err(PipelineError::NoMatchingContent {
            id: id.clone(),
            candidates: entries.len(),
        })
    }
}

/// Run a ledger call under `timeout`.
pub(crate) async fn bounded<T, F, D>(timeout: Duration, what: D, call: F) -> PipelineResult<T>
where
    F: Future<Output = Result<T, LedgerError>>,
    D: FnOnce() -> String,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(PipelineError::timeout(what())),
    }
}
