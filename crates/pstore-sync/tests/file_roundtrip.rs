//! Integration test: put → upload → get round trip through the crypto pool
//!
//! Node A stores a file and its scheduler publishes every chunk. Node B
//! shares only the ledger and reassembles the file from it.

mod common;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use pstore_chunks::{ChunkSizes, FileMap, FileMapEntry};
use pstore_core::UploadStatus;
use pstore_crypto::{CryptoPool, EncryptionContext, KeyPair};
use pstore_sync::{
    ChunkCache, ChunkStore, DownloadOptions, DownloadPipeline, FileService, MemoryChunkStore,
    SchedulerOptions, UploadOptions, UploadPipeline, UploadScheduler,
};

fn key() -> Arc<KeyPair> {
    static KEY: OnceLock<Arc<KeyPair>> = OnceLock::new();
    KEY.get_or_init(|| {
        let private = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 512).unwrap();
        Arc::new(KeyPair::from_private_key(private))
    })
    .clone()
}

fn service(node: &common::Node, pool: &CryptoPool) -> FileService {
    FileService::new(
        node.downloads.clone(),
        node.uploads.clone(),
        pool.clone(),
        key(),
        EncryptionContext::new(512, 1).unwrap(),
        node.dir.path().join("work"),
        ChunkSizes::SMALL,
        Duration::from_secs(30),
    )
}

fn sample(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn roundtrip_on_same_node() {
    let node = common::node(Duration::ZERO);
    let pool = CryptoPool::start(2, 8).unwrap();
    let files = service(&node, &pool);

    let original = sample(40 * 1024);
    let src = node.dir.path().join("src.bin");
    std::fs::write(&src, &original).unwrap();

    let file_id = files.put_file(&src).await.unwrap();
    let map_bytes = node.downloads.get_chunk(&file_id, true).await.unwrap();
    let map = FileMap::from_bytes(&map_bytes).unwrap();
    assert!(map.chunks.len() > 1, "expected several chunks");
    assert_eq!(map.file_size, original.len() as u64);

    let dst = node.dir.path().join("out").join("dst.bin");
    let written = files.get_file(&file_id, &dst).await.unwrap();
    assert_eq!(written, original.len() as u64);
    assert_eq!(std::fs::read(&dst).unwrap(), original);

    let leftovers = std::fs::read_dir(node.dir.path().join("work")).unwrap().count();
    assert_eq!(leftovers, 0, "work files must be cleaned up");

    pool.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn roundtrip_empty_file() {
    let node = common::node(Duration::ZERO);
    let pool = CryptoPool::start(1, 2).unwrap();
    let files = service(&node, &pool);

    let src = node.dir.path().join("empty");
    std::fs::write(&src, b"").unwrap();
    let file_id = files.put_file(&src).await.unwrap();

    let dst = node.dir.path().join("empty.out");
    assert_eq!(files.get_file(&file_id, &dst).await.unwrap(), 0);
    assert!(std::fs::read(&dst).unwrap().is_empty());

    pool.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_node_restores_from_ledger() {
    let writer = common::node(Duration::ZERO);
    let pool = CryptoPool::start(2, 8).unwrap();

    let original = sample(20 * 1024 + 333);
    let src = writer.dir.path().join("doc.bin");
    std::fs::write(&src, &original).unwrap();
    let file_id = service(&writer, &pool).put_file(&src).await.unwrap();

    let staged = writer.store.query(&|_| true).unwrap().len();
    let handle = UploadScheduler::spawn(
        writer.uploads.clone(),
        SchedulerOptions {
            interval: Duration::from_millis(20),
            concurrency: 4,
            max_retries: 3,
        },
    );
    for _ in 0..300 {
        let uploaded = writer
            .store
            .query(&|c| c.upload_status == UploadStatus::Uploaded)
            .unwrap()
            .len();
        if uploaded == staged {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await;

    // Reader: fresh records and cache, same ledger.
    let reader_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryChunkStore::new());
    let cache = ChunkCache::new(reader_dir.path().join("cache"));
    let downloads = Arc::new(DownloadPipeline::new(
        store.clone(),
        writer.ledger.clone(),
        cache.clone(),
        DownloadOptions::default(),
    ));
    let uploads = Arc::new(UploadPipeline::new(
        store.clone(),
        writer.ledger.clone(),
        cache,
        UploadOptions::default(),
    ));
    let reader = FileService::new(
        downloads,
        uploads,
        pool.clone(),
        key(),
        EncryptionContext::new(512, 1).unwrap(),
        reader_dir.path().join("work"),
        ChunkSizes::SMALL,
        Duration::from_secs(30),
    );

    let dst = reader_dir.path().join("restored.bin");
    reader.get_file(&file_id, &dst).await.unwrap();
    assert_eq!(std::fs::read(&dst).unwrap(), original);
    assert_eq!(store.query(&|_| true).unwrap().len(), staged);

    pool.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_file_map_fails_cleanly() {
    let node = common::node(Duration::ZERO);
    let pool = CryptoPool::start(1, 4).unwrap();
    let files = service(&node, &pool);

    let huge = u64::MAX / 2;
    let map = FileMap::new(
        huge,
        "ff".into(),
        vec![FileMapEntry {
            id: pstore_chunks::id_of(b"not on any ledger"),
            plain_len: huge,
        }],
    );
    let file_id = node.uploads.stage(&map.to_bytes().unwrap()).await.unwrap();

    let dst = node.dir.path().join("never.bin");
    assert!(files.get_file(&file_id, &dst).await.is_err());
    assert!(!dst.exists());

    pool.shutdown();
}
