//! Shared data model for the resumable upload engine.
//!
//! Everything the store, transport and engine crates agree on lives here:
//! the per-upload record, the status lifecycle, the opaque blob handle,
//! chunk arithmetic, and the camelCase wire messages.

mod messages;
mod types;

pub use messages::{InitiateUploadRequest, InitiateUploadResponse, UploadStatusResponse};
pub use types::{
    Blob, UploadRecord, UploadStatus, chunk_len, progress_percent, total_chunks, uploaded_bytes,
};

/// Default chunk size: 5 MiB.
///
/// The server may override this per upload in its initiate response, in
/// which case `total_chunks` is recomputed from the new value.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Prefix of locally minted ids used between registration and the server's
/// initiate acknowledgment.
pub const TEMP_ID_PREFIX: &str = "temp_";
