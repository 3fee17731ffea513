use thiserror::Error;

use crate::types::{ChunkId, StatusField};

pub type PstoreResult<T> = Result<T, PstoreError>;

#[derive(Debug, Error)]
pub enum PstoreError {
    #[error("config error: {0}")]
    Config(String),

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised by chunk record stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Compare-and-set lost: another owner changed the status first.
    #[error("{field} status of {id} is {actual}, expected {expected}")]
    Conflict {
        id: ChunkId,
        field: StatusField,
        expected: String,
        actual: String,
    },

    #[error("illegal {field} transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: ChunkId,
        field: StatusField,
        from: String,
        to: String,
    },

    #[error("chunk record not found: {0}")]
    NotFound(ChunkId),

    #[error("persisting chunk records: {0:#}")]
    Persist(anyhow::Error),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid chunk id {0:?}: expected a non-empty ASCII alphanumeric string")]
pub struct InvalidChunkId(pub String);
