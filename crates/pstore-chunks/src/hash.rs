//! BLAKE3 content ids for byte slices and files
//!
//! A chunk id is the lowercase hex BLAKE3 digest of the chunk's stored bytes.
//! Verification failures are their own error type so callers can tell a bad
//! backend response apart from a transport failure.

use anyhow::{Context, Result};
use pstore_core::ChunkId;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// A BLAKE3 hash digest (32 bytes), displayed as 64 hex chars
pub type Hash = blake3::Hash;

/// Fetched or produced bytes do not hash to the id they were requested under.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("content hash mismatch: expected {expected}, got {actual}")]
pub struct VerifyError {
    pub expected: ChunkId,
    pub actual: ChunkId,
}

/// Hash a byte slice in memory.
pub fn hash_bytes(data: &[u8]) -> Hash {
    blake3::hash(data)
}

/// Content id of a byte slice.
pub fn id_of(data: &[u8]) -> ChunkId {
    ChunkId::from_digest_hex(hash_bytes(data).to_hex().to_string())
}

/// Content id of a file, hashed with the streaming interface.
pub fn id_of_file(path: &Path) -> Result<ChunkId> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("opening file for hashing: {}", path.display()))?;

    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading for hash: {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(ChunkId::from_digest_hex(hasher.finalize().to_hex().to_string()))
}

/// Check that `data` hashes to `expected`.
pub fn verify(data: &[u8], expected: &ChunkId) -> Result<(), VerifyError> {
    let actual = id_of(data);
    if &actual == expected {
        Ok(())
    } else {
        Err(VerifyError {
            expected: expected.clone(),
            actual,
        })
    }
}

pub fn matches(data: &[u8], expected: &ChunkId) -> bool {
    verify(data, expected).is_ok()
}
