//! FileMap: the JSON document that addresses a stored file.
//!
//! A file is stored as encrypted chunks plus one plain chunk holding its
//! FileMap; the FileMap's own id is the file's address. Each entry carries
//! the plaintext length of its chunk, which is what lets readers truncate
//! the block padding the cipher adds to the final block.

use anyhow::{Context, Result};
use pstore_core::ChunkId;
use serde::{Deserialize, Serialize};

pub const FILEMAP_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMapEntry {
    /// Content id of the encrypted chunk
    pub id: ChunkId,
    /// Plaintext length before encryption
    pub plain_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMap {
    pub version: u32,
    /// Plaintext file size in bytes
    pub file_size: u64,
    /// BLAKE3 hex of the whole plaintext file
    pub file_hash: String,
    /// Chunks in file order
    pub chunks: Vec<FileMapEntry>,
}

impl FileMap {
    pub fn new(file_size: u64, file_hash: String, chunks: Vec<FileMapEntry>) -> Self {
        FileMap {
            version: FILEMAP_VERSION,
            file_size,
            file_hash,
            chunks,
        }
    }

    /// Parse and sanity-check a FileMap.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let map: FileMap = serde_json::from_slice(data).context("parsing file map")?;
        if map.version != FILEMAP_VERSION {
            anyhow::bail!("unsupported file map version {}", map.version);
        }
        let total = map
            .chunks
            .iter()
            .try_fold(0u64, |acc, c| acc.checked_add(c.plain_len))
            .context("file map chunk lengths overflow")?;
        if total != map.file_size {
            anyhow::bail!(
                "file map chunk lengths sum to {total}, but file_size is {}",
                map.file_size
            );
        }
        Ok(map)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).context("serializing file map")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, len: u64) -> FileMapEntry {
        FileMapEntry {
            id: ChunkId::parse(id).unwrap(),
            plain_len: len,
        }
    }

    #[test]
    fn roundtrip() {
        let map = FileMap::new(30, "ff00".into(), vec![entry("aa", 10), entry("bb", 20)]);
        let parsed = FileMap::from_bytes(&map.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, map);
    }

    #[test]
    fn empty_file_has_no_chunks() {
        let map = FileMap::new(0, "00".into(), vec![]);
        let parsed = FileMap::from_bytes(&map.to_bytes().unwrap()).unwrap();
        assert!(parsed.chunks.is_empty());
    }

    #[test]
    fn inconsistent_lengths_rejected() {
        let map = FileMap::new(31, "ff".into(), vec![entry("aa", 10), entry("bb", 20)]);
        let err = FileMap::from_bytes(&map.to_bytes().unwrap()).unwrap_err();
        assert!(err.to_string().contains("sum to 30"));
    }

    #[test]
    fn overflowing_lengths_rejected() {
        let json = format!(
            r#"{{"version":1,"file_size":1,"file_hash":"ff","chunks":[{{"id":"aa","plain_len":{}}},{{"id":"bb","plain_len":2}}]}}"#,
            u64::MAX
        );
        let err = FileMap::from_bytes(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("overflow"));
    }

    #[test]
    fn invalid_chunk_id_rejected() {
        let json = br#"{"version":1,"file_size":1,"file_hash":"x","chunks":[{"id":"../x","plain_len":1}]}"#;
        assert!(FileMap::from_bytes(json).is_err());
    }

    #[test]
    fn garbage_rejected() {
        assert!(FileMap::from_bytes(b"not json").is_err());
    }
}
