use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PstoreError, PstoreResult};

/// Top-level node configuration (loaded from pstore.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PstoreConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub crypto: CryptoConfig,
    pub download: DownloadConfig,
    pub upload: UploadConfig,
    pub chunking: ChunkingConfig,
    pub records: RecordsConfig,
}

impl PstoreConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> PstoreResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(PstoreConfig::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: PstoreConfig = toml::from_str(&content)
            .map_err(|e| PstoreError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipelines cannot run with.
    pub fn validate(&self) -> PstoreResult<()> {
        if self.crypto.block_size_bits == 0 || self.crypto.block_size_bits % 8 != 0 {
            return Err(PstoreError::Config(format!(
                "crypto.block_size_bits must be a positive multiple of 8, got {}",
                self.crypto.block_size_bits
            )));
        }
        if self.crypto.padding_bytes == 0
            || self.crypto.padding_bytes >= self.crypto.block_size_bits / 8
        {
            return Err(PstoreError::Config(format!(
                "crypto.padding_bytes must be in 1..{}, got {}",
                self.crypto.block_size_bits / 8,
                self.crypto.padding_bytes
            )));
        }
        if self.upload.concurrency == 0 {
            return Err(PstoreError::Config(
                "upload.concurrency must be at least 1".into(),
            ));
        }
        let c = &self.chunking;
        if !(c.min_size <= c.avg_size && c.avg_size <= c.max_size) {
            return Err(PstoreError::Config(format!(
                "chunking sizes must satisfy min <= avg <= max, got {}/{}/{}",
                c.min_size, c.avg_size, c.max_size
            )));
        }
        Ok(())
    }
}

/// Expand a leading `~/` against `$HOME`. Other paths are returned as-is.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Prometheus metrics + health endpoint (default: 127.0.0.1:9100)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            metrics_addr: Some("127.0.0.1:9100".into()),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

/// Which OpenDAL service backs the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Memory,
    Fs,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Root directory for the `fs` backend
    pub root: PathBuf,
    /// S3-compatible endpoint
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    /// Key prefix under which ledger entries and tags live
    pub prefix: String,
    /// Refuse plaintext HTTP endpoints
    pub enforce_tls: bool,
    /// Upper bound for a single backend call
    pub backend_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Fs,
            root: PathBuf::from("~/.local/share/pstore/ledger"),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "pstore".into(),
            prefix: "ledger".into(),
            enforce_tls: false,
            backend_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding `chunk_<id>` files
    pub cache_dir: PathBuf,
    /// Scratch directory for cipher input/output files
    pub work_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("~/.cache/pstore/chunks"),
            work_dir: PathBuf::from("~/.cache/pstore/work"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Fixed block width of the asymmetric primitive (must equal the key size)
    pub block_size_bits: usize,
    /// Leading bytes of each block reserved as padding
    pub padding_bytes: usize,
    /// PEM private key (PKCS#8 or PKCS#1), needed to encrypt
    pub private_key_file: Option<PathBuf>,
    /// PEM public key; derived from the private key when absent
    pub public_key_file: Option<PathBuf>,
    /// Cipher worker count (0 = cpu_count)
    pub workers: usize,
    /// Maximum queued cipher requests
    pub queue_depth: usize,
    /// Timeout for a single cipher request
    pub request_timeout_secs: u64,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            block_size_bits: 1024,
            padding_bytes: 1,
            private_key_file: None,
            public_key_file: None,
            workers: 0,
            queue_depth: 64,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Delay before re-checking a chunk another caller is fetching
    pub backoff_ms: u64,
    /// Give up waiting on another caller's fetch after this long
    pub wait_timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            backoff_ms: 100,
            wait_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Seconds between scheduler passes
    pub interval_secs: u64,
    /// Maximum uploads in flight
    pub concurrency: usize,
    /// Failed uploads are retried until this many attempts
    pub max_retries: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            concurrency: 8,
            max_retries: 3,
        }
    }
}

/// Content-defined chunking bounds, in bytes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub min_size: u32,
    pub avg_size: u32,
    pub max_size: u32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_size: 64 * 1024,
            avg_size: 256 * 1024,
            max_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    /// Chunk record file (JSON); omit to keep records in memory only
    pub path: Option<PathBuf>,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("~/.local/share/pstore/chunks.json")),
        }
    }
}
