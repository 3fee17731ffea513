use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("block primitive failed: {0}")]
    Primitive(String),

    #[error("key modulus is {key_bytes} bytes but the cipher block is {block_bytes} bytes")]
    KeySize { key_bytes: usize, block_bytes: usize },

    #[error("invalid encryption context: {0}")]
    Context(String),

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cipher request {correlation_id} timed out")]
    Timeout { correlation_id: Uuid },

    #[error("cipher request {correlation_id} failed: {reason}")]
    WorkerFailed { correlation_id: Uuid, reason: String },

    #[error("crypto worker pool is closed")]
    PoolClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
