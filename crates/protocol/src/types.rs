use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TEMP_ID_PREFIX;

// ---------------------------------------------------------------------------
// Chunk arithmetic
// ---------------------------------------------------------------------------

/// Number of chunks needed to cover `filesize` bytes: ⌈filesize / chunk_size⌉.
pub fn total_chunks(filesize: u64, chunk_size: u64) -> u32 {
    if chunk_size == 0 {
        return 0;
    }
    filesize.div_ceil(chunk_size) as u32
}

/// Byte length of the chunk at `index` (the last chunk may be shorter).
pub fn chunk_len(index: u32, chunk_size: u64, filesize: u64) -> u64 {
    let offset = u64::from(index) * chunk_size;
    chunk_size.min(filesize.saturating_sub(offset))
}

/// Total bytes covered by the given chunk indices.
pub fn uploaded_bytes(chunks: &[u32], chunk_size: u64, filesize: u64) -> u64 {
    chunks
        .iter()
        .map(|&i| chunk_len(i, chunk_size, filesize))
        .sum()
}

/// Percentage in `[0, 100]` for `uploaded` of `filesize` bytes.
pub fn progress_percent(uploaded: u64, filesize: u64) -> f64 {
    if filesize == 0 {
        return 0.0;
    }
    (100.0 * uploaded as f64 / filesize as f64).clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an upload.
///
/// `Completed`, `Failed` and `Canceled` are terminal: no chunk transmission
/// happens for records in those states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    Initiating,
    Pending,
    Uploading,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl UploadStatus {
    /// Returns `true` for `Completed`, `Failed` and `Canceled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Returns `true` for records the engine may still move forward
    /// (`Pending`, `Uploading`, `Paused`).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Uploading | Self::Paused)
    }

    /// Parses the lowercase status strings the server uses in its status
    /// responses. Unknown values map to `None`.
    pub fn from_remote(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "initiating" => Some(Self::Initiating),
            "pending" => Some(Self::Pending),
            "uploading" => Some(Self::Uploading),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "canceled" | "cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initiating => "INITIATING",
            Self::Pending => "PENDING",
            Self::Uploading => "UPLOADING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// Opaque binary value of known length supporting range extraction.
///
/// Cloning is cheap; the backing buffer is shared.
#[derive(Clone)]
pub struct Blob {
    data: Arc<[u8]>,
}

impl Blob {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copies out the byte range `[start, end)`, clamped to the blob bounds.
    pub fn slice(&self, start: u64, end: u64) -> Vec<u8> {
        let len = self.data.len() as u64;
        let start = start.min(len) as usize;
        let end = end.clamp(start as u64, len) as usize;
        self.data[start..end].to_vec()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for Blob {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blob({} bytes)", self.data.len())
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

// ---------------------------------------------------------------------------
// UploadRecord
// ---------------------------------------------------------------------------

/// Per-file state container, keyed by `upload_id`.
///
/// `uploaded_bytes` and `progress` are derived from `uploaded_chunks`;
/// callers go through [`UploadRecord::set_uploaded_chunks`] or
/// [`UploadRecord::mark_chunk_uploaded`] instead of writing them directly.
/// The blob itself is never serialized; binaries live in the blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub upload_id: String,
    pub filename: String,
    pub filetype: String,
    pub filesize: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    /// Canonical form: strictly ascending, deduped, every element < total_chunks.
    pub uploaded_chunks: Vec<u32>,
    pub uploaded_bytes: u64,
    pub progress: f64,
    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub needs_file: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_key: Option<String>,
    #[serde(skip)]
    pub blob: Option<Blob>,
}

impl UploadRecord {
    /// Creates a fresh `Initiating` record with no chunks uploaded.
    pub fn new(
        upload_id: impl Into<String>,
        filename: impl Into<String>,
        filetype: impl Into<String>,
        filesize: u64,
        chunk_size: u64,
    ) -> Self {
        Self {
            upload_id: upload_id.into(),
            filename: filename.into(),
            filetype: filetype.into(),
            filesize,
            chunk_size,
            total_chunks: total_chunks(filesize, chunk_size),
            uploaded_chunks: Vec::new(),
            uploaded_bytes: 0,
            progress: 0.0,
            status: UploadStatus::Initiating,
            created_at: Utc::now(),
            last_error: None,
            last_error_at: None,
            needs_file: false,
            s3_key: None,
            blob: None,
        }
    }

    pub fn with_blob(mut self, blob: Blob) -> Self {
        self.blob = Some(blob);
        self
    }

    /// Whether this record still carries a locally minted id.
    pub fn is_temp(&self) -> bool {
        self.upload_id.starts_with(TEMP_ID_PREFIX)
    }

    pub fn has_chunk(&self, index: u32) -> bool {
        self.uploaded_chunks.binary_search(&index).is_ok()
    }

    /// Replaces the chunk set, canonicalizing it and recomputing the derived
    /// byte/progress fields. This is the only path that may shrink the set.
    pub fn set_uploaded_chunks(&mut self, chunks: Vec<u32>) {
        let mut chunks = chunks;
        chunks.sort_unstable();
        chunks.dedup();
        chunks.retain(|&i| i < self.total_chunks);
        self.uploaded_chunks = chunks;
        self.recompute_derived();
    }

    /// Adds one acknowledged chunk to the set.
    pub fn mark_chunk_uploaded(&mut self, index: u32) {
        if index >= self.total_chunks {
            return;
        }
        if let Err(pos) = self.uploaded_chunks.binary_search(&index) {
            self.uploaded_chunks.insert(pos, index);
            self.recompute_derived();
        }
    }

    /// Applies a server-side chunk size override and recomputes
    /// `total_chunks` plus the derived fields.
    pub fn apply_chunk_size(&mut self, chunk_size: u64) {
        if chunk_size == 0 || chunk_size == self.chunk_size {
            return;
        }
        self.chunk_size = chunk_size;
        self.total_chunks = total_chunks(self.filesize, chunk_size);
        let chunks = std::mem::take(&mut self.uploaded_chunks);
        self.set_uploaded_chunks(chunks);
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.last_error_at = Some(Utc::now());
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.last_error_at = None;
    }

    fn recompute_derived(&mut self) {
        self.uploaded_bytes = uploaded_bytes(&self.uploaded_chunks, self.chunk_size, self.filesize);
        self.progress = progress_percent(self.uploaded_bytes, self.filesize);
    }
}
