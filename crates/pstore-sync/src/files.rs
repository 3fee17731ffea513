//! Whole-file put/get on top of the chunk pipelines
//!
//! put: file → FastCDC plaintext chunks → encrypt (worker pool) → stage
//!      → FileMap staged as a plain chunk; its id addresses the file.
//! get: FileMap → fetch each chunk → decrypt → truncate to `plain_len`
//!      → verify whole-file hash → temp + rename into place.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pstore_chunks::{
    chunk_data, hash_bytes, id_of, verify, ChunkSizes, FileMap, FileMapEntry, VerifyError,
};
use pstore_core::ChunkId;
use pstore_crypto::{CryptoOutcome, CryptoPool, CryptoRequest, EncryptionContext, KeyPair};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::download::DownloadPipeline;
use crate::error::{PipelineError, PipelineResult};
use crate::upload::UploadPipeline;

pub struct FileService {
    downloads: Arc<DownloadPipeline>,
    uploads: Arc<UploadPipeline>,
    pool: CryptoPool,
    key: Arc<KeyPair>,
    context: EncryptionContext,
    work_dir: PathBuf,
    sizes: ChunkSizes,
    request_timeout: Duration,
}

impl FileService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        downloads: Arc<DownloadPipeline>,
        uploads: Arc<UploadPipeline>,
        pool: CryptoPool,
        key: Arc<KeyPair>,
        context: EncryptionContext,
        work_dir: impl Into<PathBuf>,
        sizes: ChunkSizes,
        request_timeout: Duration,
    ) -> Self {
        FileService {
            downloads,
            uploads,
            pool,
            key,
            context,
            work_dir: work_dir.into(),
            sizes,
            request_timeout,
        }
    }

    /// Store the file at `path`. Returns the id of its FileMap.
    pub async fn put_file(&self, path: &Path) -> PipelineResult<ChunkId> {
        let data = fs::read(path).await?;
        fs::create_dir_all(&self.work_dir).await?;

        let pieces = chunk_data(&data, self.sizes);
        let mut entries = Vec::with_capacity(pieces.len());

        for piece in &pieces {
            let start = piece.offset as usize;
            let plain = &data[start..start + piece.length];

            let work = WorkFiles::new(&self.work_dir);
            fs::write(&work.input, plain).await?;
            let outcome = self
                .transform(CryptoRequest::encrypt(
                    &work.input,
                    &work.output,
                    self.key.clone(),
                    self.context,
                ))
                .await?;
            check(&outcome.hash_in, id_of(plain))?;

            let sealed = fs::read(&work.output).await?;
            let id = self.uploads.stage(&sealed).await?;
            check(&outcome.hash_out, id.clone())?;

            debug!(id = %id, offset = piece.offset, plain_len = piece.length, "file chunk staged");
            entries.push(FileMapEntry {
                id,
                plain_len: piece.length as u64,
            });
        }

        let map = FileMap::new(
            data.len() as u64,
            hash_bytes(&data).to_hex().to_string(),
            entries,
        );
        let file_id = self.uploads.stage(&map.to_bytes()?).await?;

        info!(
            path = %path.display(),
            file_id = %file_id,
            chunks = map.chunks.len(),
            bytes = map.file_size,
            "file stored"
        );
        Ok(file_id)
    }

    /// Reassemble file `file_id` into `dest`. Returns the file size.
    pub async fn get_file(&self, file_id: &ChunkId, dest: &Path) -> PipelineResult<u64> {
        let map_bytes = self.downloads.get_chunk(file_id, true).await?;
        let map = FileMap::from_bytes(&map_bytes)?;
        fs::create_dir_all(&self.work_dir).await?;

        // file_size comes from ledger data; grow as verified chunks arrive.
        let mut out = Vec::new();
        for entry in &map.chunks {
            let sealed = self.downloads.get_chunk(&entry.id, true).await?;

            let work = WorkFiles::new(&self.work_dir);
            fs::write(&work.input, &sealed).await?;
            let outcome = self
                .transform(CryptoRequest::decrypt(
                    &work.input,
                    &work.output,
                    self.key.clone(),
                    self.context,
                ))
                .await?;
            check(&entry.id, outcome.hash_in)?;

            let plain = fs::read(&work.output).await?;
            let len = entry.plain_len as usize;
            if plain.len() < len {
                return Err(PipelineError::Other(anyhow::anyhow!(
                    "chunk {} decrypted to {} bytes, expected at least {len}",
                    entry.id,
                    plain.len()
                )));
            }
            out.extend_from_slice(&plain[..len]);
        }

        verify(&out, &ChunkId::parse(map.file_hash.as_str())?)?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = partial_path(dest);
        fs::write(&tmp, &out).await?;
        if let Err(e) = fs::rename(&tmp, dest).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        info!(file_id = %file_id, dest = %dest.display(), bytes = out.len(), "file restored");
        Ok(out.len() as u64)
    }

    async fn transform(&self, request: CryptoRequest) -> PipelineResult<CryptoOutcome> {
        Ok(self
            .pool
            .submit_timeout(request, self.request_timeout)
            .await?
            .into_result()?)
    }
}

fn check(expected: &ChunkId, actual: ChunkId) -> Result<(), VerifyError> {
    if *expected == actual {
        Ok(())
    } else {
        Err(VerifyError {
            expected: expected.clone(),
            actual,
        })
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.partial", Uuid::new_v4()));
    dest.with_file_name(name)
}

/// Scratch input/output pair for one cipher request, removed on drop.
struct WorkFiles {
    input: PathBuf,
    output: PathBuf,
}

impl WorkFiles {
    fn new(dir: &Path) -> Self {
        let stem = Uuid::new_v4();
        WorkFiles {
            input: dir.join(format!("{stem}.in")),
            output: dir.join(format!("{stem}.out")),
        }
    }
}

impl Drop for WorkFiles {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.input);
        let _ = std::fs::remove_file(&self.output);
    }
}
