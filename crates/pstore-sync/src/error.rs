use pstore_chunks::VerifyError;
use pstore_core::{ChunkId, InvalidChunkId, StoreError};
use pstore_crypto::CryptoError;
use pstore_storage::LedgerError;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Backend unreachable or failed; retryable by the caller.
    #[error("ledger transport error: {0}")]
    Transport(#[from] LedgerError),

    #[error("timed out {what}")]
    Timeout { what: String },

    #[error(transparent)]
    Verification(#[from] VerifyError),

    #[error("no ledger entry for {id} matched its content hash ({candidates} candidates)")]
    NoMatchingContent { id: ChunkId, candidates: usize },

    #[error("fetch of {id} failed: {reason}")]
    FetchFailed { id: ChunkId, reason: String },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    InvalidId(#[from] InvalidChunkId),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn timeout(what: impl Into<String>) -> Self {
        PipelineError::Timeout { what: what.into() }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Transport(_) | PipelineError::Timeout { .. }
        )
    }
}
