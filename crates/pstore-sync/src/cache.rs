//! Local chunk cache
//!
//! Layout: `{cache_dir}/chunk_{id}`. Writers go through
//! `{cache_dir}/chunk_{id}.{uuid}.tmp` and rename, so readers never see a
//! partial file. A cache file is only trusted while its record says
//! `Completed`.

use anyhow::{Context, Result};
use pstore_core::ChunkId;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ChunkCache {
    dir: PathBuf,
}

impl ChunkCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ChunkCache { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &ChunkId) -> PathBuf {
        self.dir.join(id.cache_file_name())
    }

    pub async fn read(&self, id: &ChunkId) -> Result<Vec<u8>> {
        let path = self.path_for(id);
        fs::read(&path)
            .await
            .with_context(|| format!("reading cached chunk: {}", path.display()))
    }

    /// Store `data` for `id` atomically.
    pub async fn write(&self, id: &ChunkId, data: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating cache dir: {}", self.dir.display()))?;

        let path = self.path_for(id);
        let tmp = self
            .dir
            .join(format!("{}.{}.tmp", id.cache_file_name(), Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("writing cache tmp: {}", tmp.display()));
        }
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming cache entry: {}", path.display()))
    }

    pub async fn contains(&self, id: &ChunkId) -> bool {
        fs::try_exists(self.path_for(id)).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ChunkId {
        ChunkId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChunkCache::new(dir.path().join("chunks"));

        cache.write(&id("abc123"), b"hello world").await.unwrap();
        assert!(cache.contains(&id("abc123")).await);
        assert_eq!(cache.read(&id("abc123")).await.unwrap(), b"hello world");
        assert_eq!(
            cache.path_for(&id("abc123")),
            dir.path().join("chunks").join("chunk_abc123")
        );
    }

    #[tokio::test]
    async fn miss_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChunkCache::new(dir.path());
        assert!(cache.read(&id("nonexistent")).await.is_err());
        assert!(!cache.contains(&id("nonexistent")).await);
    }

    #[tokio::test]
    async fn overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChunkCache::new(dir.path());
        cache.write(&id("k"), b"first").await.unwrap();
        cache.write(&id("k"), b"second").await.unwrap();
        assert_eq!(cache.read(&id("k")).await.unwrap(), b"second");

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["chunk_k".to_string()]);
    }
}
