pub mod config;
pub mod error;
pub mod types;

pub use error::{InvalidChunkId, PstoreError, PstoreResult, StoreError};
pub use types::{
    unix_now, Chunk, ChunkId, DownloadStatus, StatusChange, StatusField, Transition,
    UploadStatus,
};
