//! Backend ledger interface
//!
//! A ledger is append-only: entries are published under a chunk id tag and
//! never rewritten. Nothing here checks that an entry's bytes actually hash
//! to its tag; verification belongs to the caller.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use pstore_core::ChunkId;
use thiserror::Error;

/// Opaque handle to one published entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryRef(String);

impl EntryRef {
    pub fn new(raw: impl Into<String>) -> Self {
        EntryRef(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger {operation} failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: opendal::Error,
    },

    #[error("ledger entry not found: {0}")]
    EntryNotFound(EntryRef),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Every entry published under `id`, possibly none.
    async fn query_by_tag(&self, id: &ChunkId) -> Result<Vec<EntryRef>, LedgerError>;

    /// Raw bytes of one entry.
    async fn fetch_raw(&self, entry: &EntryRef) -> Result<Bytes, LedgerError>;

    /// Append `data` tagged with `id`.
    async fn publish(&self, id: &ChunkId, data: Bytes) -> Result<EntryRef, LedgerError>;
}
