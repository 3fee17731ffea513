//! Crypto worker pool
//!
//! Whole-file chain transforms run on dedicated OS threads fed by a bounded
//! queue. Callers on the async side submit a [`CryptoRequest`] and await a
//! [`CryptoResponse`] on a oneshot channel; the two sides share nothing but
//! the file paths named in the request.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use pstore_chunks::id_of_file;
use pstore_core::config::CryptoConfig;
use pstore_core::ChunkId;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chain::{decrypt_file, encrypt_file, EncryptionContext};
use crate::error::CryptoError;
use crate::keys::KeyPair;
use crate::primitive::RsaPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Encrypt,
    Decrypt,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Encrypt => f.write_str("encrypt"),
            Operation::Decrypt => f.write_str("decrypt"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CryptoRequest {
    pub operation: Operation,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub key: Arc<KeyPair>,
    pub context: EncryptionContext,
    pub correlation_id: Uuid,
}

impl CryptoRequest {
    pub fn encrypt(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        key: Arc<KeyPair>,
        context: EncryptionContext,
    ) -> Self {
        Self::new(Operation::Encrypt, input_path, output_path, key, context)
    }

    pub fn decrypt(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        key: Arc<KeyPair>,
        context: EncryptionContext,
    ) -> Self {
        Self::new(Operation::Decrypt, input_path, output_path, key, context)
    }

    fn new(
        operation: Operation,
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        key: Arc<KeyPair>,
        context: EncryptionContext,
    ) -> Self {
        CryptoRequest {
            operation,
            input_path: input_path.into(),
            output_path: output_path.into(),
            key,
            context,
            correlation_id: Uuid::new_v4(),
        }
    }
}

/// Result of a successful transform.
///
/// `hash_in` and `hash_out` are hashed from the files on disk, independently
/// of the transform itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoOutcome {
    pub operation: Operation,
    pub correlation_id: Uuid,
    pub hash_in: ChunkId,
    pub hash_out: ChunkId,
    pub blocks: u64,
}

#[derive(Debug, Clone)]
pub enum CryptoResponse {
    Done(CryptoOutcome),
    Failed {
        operation: Operation,
        correlation_id: Uuid,
        reason: String,
    },
}

impl CryptoResponse {
    pub fn success(&self) -> bool {
        matches!(self, CryptoResponse::Done(_))
    }

    pub fn correlation_id(&self) -> Uuid {
        match self {
            CryptoResponse::Done(outcome) => outcome.correlation_id,
            CryptoResponse::Failed { correlation_id, .. } => *correlation_id,
        }
    }

    pub fn into_result(self) -> Result<CryptoOutcome, CryptoError> {
        match self {
            CryptoResponse::Done(outcome) => Ok(outcome),
            CryptoResponse::Failed {
                correlation_id,
                reason,
                ..
            } => Err(CryptoError::WorkerFailed {
                correlation_id,
                reason,
            }),
        }
    }
}

/// Execute one request on the current thread.
pub fn process(request: &CryptoRequest) -> CryptoResponse {
    match run(request) {
        Ok(outcome) => CryptoResponse::Done(outcome),
        Err(e) => CryptoResponse::Failed {
            operation: request.operation,
            correlation_id: request.correlation_id,
            reason: e.to_string(),
        },
    }
}

fn run(request: &CryptoRequest) -> Result<CryptoOutcome, CryptoError> {
    let hash_in = id_of_file(&request.input_path)?;
    let primitive = RsaPrimitive::new(request.key.clone());

    let blocks = match request.operation {
        Operation::Encrypt => encrypt_file(
            &primitive,
            &request.context,
            &request.input_path,
            &request.output_path,
        )?,
        Operation::Decrypt => decrypt_file(
            &primitive,
            &request.context,
            &request.input_path,
            &request.output_path,
        )?,
    };

    let hash_out = id_of_file(&request.output_path)?;
    Ok(CryptoOutcome {
        operation: request.operation,
        correlation_id: request.correlation_id,
        hash_in,
        hash_out,
        blocks,
    })
}

// ── Pool ──────────────────────────────────────────────────────────────────────

struct Job {
    request: CryptoRequest,
    respond: oneshot::Sender<CryptoResponse>,
}

struct Inner {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

/// Fixed pool of cipher threads behind a bounded request queue.
#[derive(Clone)]
pub struct CryptoPool {
    inner: Arc<Inner>,
}

impl CryptoPool {
    pub fn start(workers: usize, queue_depth: usize) -> Result<Self, CryptoError> {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let rx = rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("pstore-crypto-{index}"))
                .spawn(move || worker_loop(index, rx))?;
            handles.push(handle);
        }

        info!(workers, queue_depth, "crypto worker pool started");
        Ok(CryptoPool {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(tx)),
                workers: Mutex::new(handles),
                size: workers,
            }),
        })
    }

    /// `workers = 0` sizes the pool to the available parallelism.
    pub fn from_config(config: &CryptoConfig) -> Result<Self, CryptoError> {
        let workers = match config.workers {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        };
        Self::start(workers, config.queue_depth)
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub async fn submit(&self, request: CryptoRequest) -> Result<CryptoResponse, CryptoError> {
        let sender = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(CryptoError::PoolClosed)?;

        let correlation_id = request.correlation_id;
        let operation = request.operation;
        let (respond, response) = oneshot::channel();
        sender
            .send(Job { request, respond })
            .await
            .map_err(|_| CryptoError::PoolClosed)?;
        debug!(%correlation_id, %operation, "cipher request queued");

        response.await.map_err(|_| CryptoError::PoolClosed)
    }

    /// Like [`submit`](Self::submit), but gives up on this request after
    /// `timeout`. The worker may still finish it; its response is dropped.
    pub async fn submit_timeout(
        &self,
        request: CryptoRequest,
        timeout: Duration,
    ) -> Result<CryptoResponse, CryptoError> {
        let correlation_id = request.correlation_id;
        match tokio::time::timeout(timeout, self.submit(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%correlation_id, ?timeout, "cipher request timed out");
                Err(CryptoError::Timeout { correlation_id })
            }
        }
    }

    /// Close the queue and join every worker. Queued requests are still
    /// processed before the workers exit.
    pub fn shutdown(&self) {
        drop(
            self.inner
                .sender
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take(),
        );

        let handles: Vec<_> = self
            .inner
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("crypto worker panicked");
            }
        }
        info!("crypto worker pool stopped");
    }
}

fn worker_loop(index: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = {
            let mut rx = rx.lock().unwrap_or_else(|e| e.into_inner());
            rx.blocking_recv()
        };
        let Some(Job { request, respond }) = job else {
            debug!(worker = index, "crypto queue closed, worker exiting");
            return;
        };

        let response = process(&request);
        if let CryptoResponse::Failed { reason, .. } = &response {
            warn!(
                worker = index,
                correlation_id = %request.correlation_id,
                operation = %request.operation,
                error = %reason,
                "cipher request failed"
            );
        }
        // The submitter may have timed out and gone away.
        let _ = respond.send(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_keys;

    fn ctx() -> EncryptionContext {
        EncryptionContext::new(512, 1).unwrap()
    }

    #[test]
    fn process_encrypt_then_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        let sealed = dir.path().join("sealed");
        let opened = dir.path().join("opened");
        std::fs::write(&plain, b"chunk body").unwrap();

        let key = test_keys::small();
        let enc = process(&CryptoRequest::encrypt(&plain, &sealed, key.clone(), ctx()))
            .into_result()
            .unwrap();
        assert_eq!(enc.hash_in, id_of_file(&plain).unwrap());
        assert_eq!(enc.hash_out, id_of_file(&sealed).unwrap());
        assert_eq!(enc.blocks, 1);

        let dec = process(&CryptoRequest::decrypt(&sealed, &opened, key, ctx()))
            .into_result()
            .unwrap();
        assert_eq!(dec.hash_in, enc.hash_out);
        assert_eq!(&std::fs::read(&opened).unwrap()[..10], b"chunk body");
    }

    #[test]
    fn missing_input_fails_with_correlation_id() {
        let dir = tempfile::tempdir().unwrap();
        let request = CryptoRequest::encrypt(
            dir.path().join("absent"),
            dir.path().join("out"),
            test_keys::small(),
            ctx(),
        );
        let response = process(&request);
        assert!(!response.success());
        assert_eq!(response.correlation_id(), request.correlation_id);
    }
}
