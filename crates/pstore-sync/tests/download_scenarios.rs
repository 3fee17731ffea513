//! Download pipeline against a counting in-memory ledger.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use pstore_chunks::id_of;
use pstore_core::DownloadStatus;
use pstore_storage::Ledger;
use pstore_sync::{ChunkStore, PipelineError};

#[tokio::test]
async fn no_entries_is_no_matching_content() {
    let n = common::node(Duration::ZERO);
    let id = id_of(b"absent everywhere");

    let err = n.downloads.get_chunk(&id, true).await.unwrap_err();
    assert!(matches!(err, PipelineError::NoMatchingContent { .. }));

    let record = n.store.get(&id).unwrap().unwrap();
    assert_eq!(record.download_status, DownloadStatus::Failed);
    assert!(record.last_error.is_some());
}

#[tokio::test]
async fn single_wrong_entry_is_no_matching_content() {
    let n = common::node(Duration::ZERO);
    let id = id_of(b"expected content");
    n.ledger
        .inner()
        .publish(&id, Bytes::from_static(b"something else entirely"))
        .await
        .unwrap();

    let err = n.downloads.get_chunk(&id, true).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::NoMatchingContent { candidates: 1, .. }
    ));
    assert_eq!(
        n.store.get(&id).unwrap().unwrap().download_status,
        DownloadStatus::Failed
    );
    assert!(!n.dir.path().join("cache").join(id.cache_file_name()).exists());
}

#[tokio::test]
async fn completed_cached_chunk_makes_no_backend_calls() {
    let n = common::node(Duration::ZERO);
    let id = n.uploads.stage(b"already here").await.unwrap();

    let got = n.downloads.get_chunk(&id, true).await.unwrap();
    assert_eq!(got.as_ref(), b"already here");
    assert_eq!(n.ledger.backend_calls(), 0);
}

#[tokio::test]
async fn bypassing_cache_refetches() {
    let n = common::node(Duration::ZERO);
    let data = b"fetch me twice".to_vec();
    let id = id_of(&data);
    n.ledger
        .inner()
        .publish(&id, Bytes::from(data.clone()))
        .await
        .unwrap();

    n.downloads.get_chunk(&id, true).await.unwrap();
    n.downloads.get_chunk(&id, false).await.unwrap();
    assert_eq!(n.ledger.queries.load(Ordering::SeqCst), 2);

    let record = n.store.get(&id).unwrap().unwrap();
    assert_eq!(record.download_status, DownloadStatus::Completed);
    assert_eq!(record.download_attempts, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_fetch() {
    let n = common::node(Duration::from_millis(100));
    let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let id = id_of(&data);
    n.ledger
        .inner()
        .publish(&id, Bytes::from(data.clone()))
        .await
        .unwrap();

    let calls = (0..8).map(|_| {
        let downloads = n.downloads.clone();
        let id = id.clone();
        async move { downloads.get_chunk(&id, true).await }
    });
    let results = futures::future::join_all(calls).await;

    for result in results {
        assert_eq!(result.unwrap().as_ref(), &data[..]);
    }
    assert_eq!(n.ledger.queries.load(Ordering::SeqCst), 1);
    assert_eq!(n.ledger.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(n.store.get(&id).unwrap().unwrap().download_attempts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_failure() {
    let n = common::node(Duration::from_millis(50));
    let id = id_of(b"nobody has this");

    let calls = (0..6).map(|_| {
        let downloads = n.downloads.clone();
        let id = id.clone();
        tokio::spawn(async move { downloads.get_chunk(&id, true).await })
    });
    let results = futures::future::join_all(calls).await;

    let mut owners = 0;
    for result in results {
        match result.unwrap() {
            Err(PipelineError::NoMatchingContent { .. }) => owners += 1,
            Err(PipelineError::FetchFailed { .. }) => {}
            other => panic!("unexpected result {other:?}"),
        }
    }
    assert_eq!(owners, 1);
    assert_eq!(n.ledger.queries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn query_error_is_recorded_and_raised() {
    let n = common::node(Duration::ZERO);
    let id = id_of(b"ledger is down");
    n.ledger.fail_query.store(true, Ordering::SeqCst);

    let err = n.downloads.get_chunk(&id, true).await.unwrap_err();
    assert!(matches!(err, PipelineError::Transport(_)));
    assert!(err.is_retryable());

    let record = n.store.get(&id).unwrap().unwrap();
    assert_eq!(record.download_status, DownloadStatus::Failed);
    assert!(record.last_error.unwrap().contains("query refused"));
}

#[tokio::test]
async fn fetch_error_is_recorded_and_raised() {
    let n = common::node(Duration::ZERO);
    let data = b"listed but unreadable".to_vec();
    let id = id_of(&data);
    n.ledger.inner().publish(&id, Bytes::from(data)).await.unwrap();
    n.ledger.fail_fetch.store(true, Ordering::SeqCst);

    let err = n.downloads.get_chunk(&id, true).await.unwrap_err();
    assert!(matches!(err, PipelineError::Transport(_)));

    let record = n.store.get(&id).unwrap().unwrap();
    assert_eq!(record.download_status, DownloadStatus::Failed);
    assert!(record.last_error.unwrap().contains("fetch refused"));
    assert!(!n.dir.path().join("cache").join(id.cache_file_name()).exists());
}

#[tokio::test]
async fn slow_ledger_times_out_and_is_recorded() {
    let n = common::node_with_timeout(Duration::from_millis(500), Duration::from_millis(50));
    let id = id_of(b"ledger too slow");

    let err = n.downloads.get_chunk(&id, true).await.unwrap_err();
    assert!(matches!(err, PipelineError::Timeout { .. }));

    let record = n.store.get(&id).unwrap().unwrap();
    assert_eq!(record.download_status, DownloadStatus::Failed);
    assert!(record.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn dropped_owner_does_not_block_later_callers() {
    let n = common::node(Duration::from_millis(300));
    let data = b"owner walks away".to_vec();
    let id = id_of(&data);
    n.ledger
        .inner()
        .publish(&id, Bytes::from(data.clone()))
        .await
        .unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), n.downloads.get_chunk(&id, true)).await;
    assert!(abandoned.is_err());

    let record = n.store.get(&id).unwrap().unwrap();
    assert_eq!(record.download_status, DownloadStatus::Failed);
    assert_eq!(record.last_error.as_deref(), Some("cancelled"));

    let got = tokio::time::timeout(Duration::from_secs(5), n.downloads.get_chunk(&id, true))
        .await
        .expect("later call finished")
        .unwrap();
    assert_eq!(got.as_ref(), &data[..]);
    assert_eq!(
        n.store.get(&id).unwrap().unwrap().download_status,
        DownloadStatus::Completed
    );
}
