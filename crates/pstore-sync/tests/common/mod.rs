//! Shared fixtures for pipeline integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pstore_core::ChunkId;
use pstore_storage::operator::build_memory_operator;
use pstore_storage::{EntryRef, Ledger, LedgerError, OpendalLedger};
use pstore_sync::{
    ChunkCache, DownloadOptions, DownloadPipeline, MemoryChunkStore, UploadOptions,
    UploadPipeline,
};
use tempfile::TempDir;

/// Memory-backed ledger that counts calls and can be slowed down or broken.
pub struct CountingLedger {
    inner: OpendalLedger,
    pub queries: AtomicUsize,
    pub fetches: AtomicUsize,
    pub publishes: AtomicUsize,
    pub delay: Duration,
    pub fail_query: AtomicBool,
    pub fail_fetch: AtomicBool,
    pub fail_publish: AtomicBool,
    /// Publishes hang until the caller gives up.
    pub stall_publish: AtomicBool,
}

impl CountingLedger {
    pub fn new(delay: Duration) -> Self {
        CountingLedger {
            inner: OpendalLedger::new(build_memory_operator().unwrap(), "it"),
            queries: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            publishes: AtomicUsize::new(0),
            delay,
            fail_query: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            stall_publish: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &OpendalLedger {
        &self.inner
    }

    pub fn backend_calls(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
            + self.fetches.load(Ordering::SeqCst)
            + self.publishes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ledger for CountingLedger {
    async fn query_by_tag(&self, id: &ChunkId) -> Result<Vec<EntryRef>, LedgerError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("query refused".into()));
        }
        self.inner.query_by_tag(id).await
    }

    async fn fetch_raw(&self, entry: &EntryRef) -> Result<Bytes, LedgerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("fetch refused".into()));
        }
        self.inner.fetch_raw(entry).await
    }

    async fn publish(&self, id: &ChunkId, data: Bytes) -> Result<EntryRef, LedgerError> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("publish refused".into()));
        }
        if self.stall_publish.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.publish(id, data).await
    }
}

pub struct Node {
    pub dir: TempDir,
    pub store: Arc<MemoryChunkStore>,
    pub ledger: Arc<CountingLedger>,
    pub downloads: Arc<DownloadPipeline>,
    pub uploads: Arc<UploadPipeline>,
}

pub fn node(delay: Duration) -> Node {
    node_with_timeout(delay, Duration::from_secs(10))
}

/// A node whose ledger calls give up after `backend_timeout`.
pub fn node_with_timeout(delay: Duration, backend_timeout: Duration) -> Node {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryChunkStore::new());
    let ledger = Arc::new(CountingLedger::new(delay));
    let cache = ChunkCache::new(dir.path().join("cache"));

    let downloads = Arc::new(DownloadPipeline::new(
        store.clone(),
        ledger.clone(),
        cache.clone(),
        DownloadOptions {
            backoff: Duration::from_millis(5),
            wait_timeout: Duration::from_secs(10),
            backend_timeout,
        },
    ));
    let uploads = Arc::new(UploadPipeline::new(
        store.clone(),
        ledger.clone(),
        cache,
        UploadOptions { backend_timeout },
    ));

    Node {
        dir,
        store,
        ledger,
        downloads,
        uploads,
    }
}
