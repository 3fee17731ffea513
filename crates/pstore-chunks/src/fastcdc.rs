//! FastCDC content-defined splitting of plaintext files
//!
//! Boundaries depend on content, so inserting bytes near the start of a file
//! only disturbs the chunks around the edit. Each plaintext chunk is later
//! encrypted on its own; its id is the hash of the ciphertext, not of these
//! bytes.

use pstore_core::config::ChunkingConfig;

/// A plaintext region of a file
#[derive(Debug, Clone)]
pub struct PlainChunk {
    /// Byte offset within the source file
    pub offset: u64,
    /// Chunk length in bytes
    pub length: usize,
    /// BLAKE3 hash of the plaintext bytes
    pub plain_hash: crate::hash::Hash,
}

/// Chunk size bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSizes {
    pub min_size: u32,
    pub avg_size: u32,
    pub max_size: u32,
}

impl ChunkSizes {
    /// Small bounds, for tests and small files
    pub const SMALL: ChunkSizes = ChunkSizes {
        min_size: 2 * 1024,  // 2KB
        avg_size: 4 * 1024,  // 4KB
        max_size: 16 * 1024, // 16KB
    };

    pub fn from_config(cfg: &ChunkingConfig) -> Self {
        ChunkSizes {
            min_size: cfg.min_size,
            avg_size: cfg.avg_size,
            max_size: cfg.max_size,
        }
    }
}

impl Default for ChunkSizes {
    fn default() -> Self {
        ChunkSizes::from_config(&ChunkingConfig::default())
    }
}

/// Split `data` into content-defined chunks.
///
/// Returns an empty list for empty data.
pub fn chunk_data(data: &[u8], sizes: ChunkSizes) -> Vec<PlainChunk> {
    if data.is_empty() {
        return vec![];
    }

    let chunker =
        fastcdc::v2020::FastCDC::new(data, sizes.min_size, sizes.avg_size, sizes.max_size);

    let chunks: Vec<PlainChunk> = chunker
        .map(|c| {
            let bytes = &data[c.offset..c.offset + c.length];
            PlainChunk {
                offset: c.offset as u64,
                length: c.length,
                plain_hash: crate::hash::hash_bytes(bytes),
            }
        })
        .collect();

    tracing::trace!(bytes = data.len(), chunks = chunks.len(), "split data");
    chunks
}
