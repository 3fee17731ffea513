//! Node lifecycle: wiring, startup recovery, scheduler, shutdown
//!
//! `put` and `get` build the same node as `run` and open the same record
//! store, so they must not run next to a live daemon on the same config.

use anyhow::{Context, Result};
use pstore_chunks::ChunkSizes;
use pstore_core::config::{expand_home, PstoreConfig};
use pstore_core::ChunkId;
use pstore_crypto::{CryptoPool, EncryptionContext, KeyPair};
use pstore_storage::OpendalLedger;
use pstore_sync::{
    open_store, recover_interrupted, ChunkCache, ChunkStore, DownloadOptions, DownloadPipeline,
    FileService, PipelineMetrics, SchedulerOptions, UploadOptions, UploadOutcome, UploadPipeline,
    UploadScheduler,
};
use prometheus_client::registry::Registry;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

/// Everything a running node holds, wired from config.
struct Node {
    operator: opendal::Operator,
    store: Arc<dyn ChunkStore>,
    uploads: Arc<UploadPipeline>,
    files: FileService,
    pool: CryptoPool,
    registry: Arc<Registry>,
}

impl Node {
    async fn build(config: &PstoreConfig) -> Result<Self> {
        // ── Key material ─────────────────────────────────────────────────────
        let private = config.crypto.private_key_file.as_deref().map(expand_home);
        let public = config.crypto.public_key_file.as_deref().map(expand_home);
        let key = Arc::new(
            KeyPair::load(private.as_deref(), public.as_deref()).context("loading key pair")?,
        );
        let context = EncryptionContext::from_config(&config.crypto)?;
        if key.size_bytes() != context.block_bytes() {
            anyhow::bail!(
                "key modulus is {} bits but crypto.block_size_bits is {}",
                key.size_bytes() * 8,
                context.block_size_bits()
            );
        }
        if !key.can_encrypt() {
            warn!("no private key configured, this node can restore files but not store them");
        }

        // ── Ledger ───────────────────────────────────────────────────────────
        let operator = pstore_storage::build_from_core_config(&config.storage)
            .context("building ledger operator")?;
        match pstore_storage::check_health(&operator).await {
            Ok(()) => info!(backend = ?config.storage.backend, "ledger: connected"),
            Err(e) => warn!(backend = ?config.storage.backend, "ledger: {e}"),
        }
        let ledger = Arc::new(OpendalLedger::new(
            operator.clone(),
            config.storage.prefix.clone(),
        ));

        // ── Records + crash recovery ─────────────────────────────────────────
        let store = open_store(&config.records)?;
        recover_interrupted(store.as_ref()).context("recovering interrupted chunks")?;

        // ── Pipelines ────────────────────────────────────────────────────────
        let mut registry = Registry::default();
        let metrics = PipelineMetrics::new(&mut registry);
        let cache = ChunkCache::new(expand_home(&config.cache.cache_dir));

        let downloads = Arc::new(
            DownloadPipeline::new(
                store.clone(),
                ledger.clone(),
                cache.clone(),
                DownloadOptions::from_config(&config.download, &config.storage),
            )
            .with_metrics(metrics.clone()),
        );
        let uploads = Arc::new(
            UploadPipeline::new(
                store.clone(),
                ledger,
                cache,
                UploadOptions::from_config(&config.storage),
            )
            .with_metrics(metrics),
        );

        let pool = CryptoPool::from_config(&config.crypto)?;
        let files = FileService::new(
            downloads,
            uploads.clone(),
            pool.clone(),
            key,
            context,
            expand_home(&config.cache.work_dir),
            ChunkSizes::from_config(&config.chunking),
            Duration::from_secs(config.crypto.request_timeout_secs),
        );

        Ok(Node {
            operator,
            store,
            uploads,
            files,
            pool,
            registry: Arc::new(registry),
        })
    }

    /// Join the cipher threads without blocking the runtime.
    async fn stop_pool(&self) {
        let pool = self.pool.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || pool.shutdown()).await {
            warn!("crypto pool shutdown failed: {e}");
        }
    }
}

pub async fn run(config: PstoreConfig) -> Result<()> {
    info!("node starting");
    let node = Node::build(&config).await?;

    let pending = node.uploads.pending(config.upload.max_retries)?.len();
    let total = node.store.query(&|_| true)?.len();
    info!(records = total, pending_uploads = pending, "chunk records ready");

    let scheduler = UploadScheduler::spawn(
        node.uploads.clone(),
        SchedulerOptions::from_config(&config.upload),
    );

    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let state = crate::metrics::HealthState {
            registry: node.registry.clone(),
            operator: node.operator.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    wait_for_signal().await?;

    info!("shutting down");
    scheduler.shutdown().await;
    node.stop_pool().await;
    info!("node stopped");
    Ok(())
}

/// Store one file. With `wait`, publish every pending chunk before returning.
pub async fn put(config: PstoreConfig, path: &Path, wait: bool) -> Result<ChunkId> {
    let node = Node::build(&config).await?;
    let result = put_inner(&node, &config, path, wait).await;
    node.stop_pool().await;
    result
}

async fn put_inner(node: &Node, config: &PstoreConfig, path: &Path, wait: bool) -> Result<ChunkId> {
    let file_id = node
        .files
        .put_file(path)
        .await
        .with_context(|| format!("storing {}", path.display()))?;

    if wait {
        let pending = node.uploads.pending(config.upload.max_retries)?;
        let mut published = 0usize;
        for record in pending {
            if let UploadOutcome::Published(_) = node
                .uploads
                .upload_chunk(&record.id)
                .await
                .with_context(|| format!("uploading chunk {}", record.id))?
            {
                published += 1;
            }
        }
        info!(file_id = %file_id, published, "pending chunks published");
    }

    Ok(file_id)
}

/// Restore one file by id into `dest`.
pub async fn get(config: PstoreConfig, file_id: &str, dest: &Path) -> Result<()> {
    let file_id: ChunkId = file_id.parse()?;
    let node = Node::build(&config).await?;
    let result = node
        .files
        .get_file(&file_id, dest)
        .await
        .with_context(|| format!("restoring {file_id}"));
    node.stop_pool().await;
    result.map(|_| ())
}

async fn wait_for_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
    Ok(())
}
