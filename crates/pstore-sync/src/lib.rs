//! pstore-sync: chunk lifecycle on top of the record store and the ledger
//!
//! - `records`: durable per-chunk status with compare-and-set claims
//! - `cache`: local `chunk_<id>` files
//! - `download`: fetch, verify, cache; one owner per chunk
//! - `upload`: stage local bytes, publish to the ledger
//! - `scheduler`: background upload loop
//! - `files`: whole-file put/get through the crypto pool

pub mod cache;
pub mod download;
pub mod error;
pub mod files;
pub mod metrics;
pub mod records;
pub mod scheduler;
pub mod upload;

pub use cache::ChunkCache;
pub use download::{DownloadOptions, DownloadPipeline, Encoding};
pub use error::{PipelineError, PipelineResult};
pub use files::FileService;
pub use metrics::PipelineMetrics;
pub use records::{
    open_store, recover_interrupted, ChunkStore, JsonChunkStore, MemoryChunkStore,
    RecoveryReport,
};
pub use scheduler::{SchedulerHandle, SchedulerOptions, UploadScheduler};
pub use upload::{UploadOptions, UploadOutcome, UploadPipeline};
