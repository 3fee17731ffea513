use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{InvalidChunkId, StoreError};

/// Content address of a chunk: the hex digest of its encrypted bytes.
///
/// Ids end up in cache file names, so only ASCII alphanumerics are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkId(String);

impl ChunkId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidChunkId> {
        let raw = raw.into();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(InvalidChunkId(raw));
        }
        Ok(ChunkId(raw))
    }

    /// Wrap a lowercase hex digest produced by the content hasher.
    pub fn from_digest_hex(hex: String) -> Self {
        debug_assert!(hex.bytes().all(|b| b.is_ascii_hexdigit()));
        ChunkId(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this chunk inside the local cache directory.
    pub fn cache_file_name(&self) -> String {
        format!("chunk_{}", self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChunkId {
    type Err = InvalidChunkId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChunkId::parse(s)
    }
}

impl TryFrom<String> for ChunkId {
    type Error = InvalidChunkId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ChunkId::parse(value)
    }
}

impl From<ChunkId> for String {
    fn from(id: ChunkId) -> Self {
        id.0
    }
}

/// Download lifecycle of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    NotStarted,
    InProgress,
    /// A hash-verified copy is in the local cache
    Completed,
    Failed,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::NotStarted => "not_started",
            DownloadStatus::InProgress => "in_progress",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// NotStarted is only ever an initial state, and Failed is only reachable
    /// from an in-flight fetch.
    pub fn can_become(self, next: DownloadStatus) -> bool {
        use DownloadStatus::*;
        match (self, next) {
            (_, NotStarted) => false,
            (InProgress, InProgress) => false,
            (_, InProgress) => true,
            (InProgress, Failed) => true,
            (_, Failed) => false,
            (Completed, Completed) => false,
            (_, Completed) => true,
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload lifecycle of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    NotStarted,
    InProgress,
    Uploaded,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::NotStarted => "not_started",
            UploadStatus::InProgress => "in_progress",
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::Failed => "failed",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// InProgress -> NotStarted is the resume path for uploads interrupted
    /// by a restart.
    pub fn can_become(self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        match (self, next) {
            (InProgress, NotStarted) => true,
            (_, NotStarted) => false,
            (InProgress | Uploaded, InProgress) => false,
            (_, InProgress) => true,
            (InProgress, Uploaded) | (InProgress, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusField {
    Download,
    Upload,
}

impl fmt::Display for StatusField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusField::Download => f.write_str("download"),
            StatusField::Upload => f.write_str("upload"),
        }
    }
}

/// Durable per-chunk record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    /// Byte length of the payload on disk, once materialized
    #[serde(default)]
    pub size: Option<u64>,
    pub download_status: DownloadStatus,
    pub upload_status: UploadStatus,
    /// Number of times a download was claimed for this chunk
    #[serde(default)]
    pub download_attempts: u32,
    /// Number of times an upload was claimed for this chunk
    #[serde(default)]
    pub upload_attempts: u32,
    /// Reason recorded by the most recent failure
    #[serde(default)]
    pub last_error: Option<String>,
    /// Unix timestamp of the last mutation
    #[serde(default)]
    pub updated_at: u64,
}

impl Chunk {
    pub fn new(id: ChunkId) -> Self {
        Chunk {
            id,
            size: None,
            download_status: DownloadStatus::NotStarted,
            upload_status: UploadStatus::NotStarted,
            download_attempts: 0,
            upload_attempts: 0,
            last_error: None,
            updated_at: unix_now(),
        }
    }

    /// Apply a status transition in place.
    ///
    /// Fails without modifying the record when the expected `from` status
    /// does not match, or when the state machine forbids the move.
    pub fn apply(&mut self, transition: &Transition) -> Result<(), StoreError> {
        match transition.change {
            StatusChange::Download { from, to } => {
                let current = self.download_status;
                if let Some(expected) = from {
                    if current != expected {
                        return Err(StoreError::Conflict {
                            id: self.id.clone(),
                            field: StatusField::Download,
                            expected: expected.to_string(),
                            actual: current.to_string(),
                        });
                    }
                }
                if !current.can_become(to) {
                    return Err(StoreError::IllegalTransition {
                        id: self.id.clone(),
                        field: StatusField::Download,
                        from: current.to_string(),
                        to: to.to_string(),
                    });
                }
                self.download_status = to;
                match to {
                    DownloadStatus::InProgress => self.download_attempts += 1,
                    DownloadStatus::Completed => self.last_error = None,
                    _ => {}
                }
            }
            StatusChange::Upload { from, to } => {
                let current = self.upload_status;
                if let Some(expected) = from {
                    if current != expected {
                        return Err(StoreError::Conflict {
                            id: self.id.clone(),
                            field: StatusField::Upload,
                            expected: expected.to_string(),
                            actual: current.to_string(),
                        });
                    }
                }
                if !current.can_become(to) {
                    return Err(StoreError::IllegalTransition {
                        id: self.id.clone(),
                        field: StatusField::Upload,
                        from: current.to_string(),
                        to: to.to_string(),
                    });
                }
                self.upload_status = to;
                match to {
                    UploadStatus::InProgress => self.upload_attempts += 1,
                    UploadStatus::Uploaded => self.last_error = None,
                    _ => {}
                }
            }
        }

        if let Some(size) = transition.size {
            self.size = Some(size);
        }
        if let Some(ref reason) = transition.error {
            self.last_error = Some(reason.clone());
        }
        self.updated_at = unix_now();
        Ok(())
    }
}

/// Which status moves, with an optional expected current value (compare-and-set)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Download {
        from: Option<DownloadStatus>,
        to: DownloadStatus,
    },
    Upload {
        from: Option<UploadStatus>,
        to: UploadStatus,
    },
}

/// A status change plus the bookkeeping recorded alongside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub change: StatusChange,
    pub size: Option<u64>,
    pub error: Option<String>,
}

impl Transition {
    pub fn download(from: Option<DownloadStatus>, to: DownloadStatus) -> Self {
        Transition {
            change: StatusChange::Download { from, to },
            size: None,
            error: None,
        }
    }

    pub fn upload(from: Option<UploadStatus>, to: UploadStatus) -> Self {
        Transition {
            change: StatusChange::Upload { from, to },
            size: None,
            error: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_error(mut self, reason: impl Into<String>) -> Self {
        self.error = Some(reason.into());
        self
    }

    pub fn field(&self) -> StatusField {
        match self.change {
            StatusChange::Download { .. } => StatusField::Download,
            StatusChange::Upload { .. } => StatusField::Upload,
        }
    }
}

/// Current Unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
