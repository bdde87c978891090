//! HTTP boundary for the resumable upload wire contract.
//!
//! [`Transport`] is the seam the engine talks through; [`HttpTransport`] is
//! the reqwest implementation. Every operation is wrapped in
//! [`with_retry`], which classifies failures and backs off with full jitter.

mod http;
mod retry;

use std::future::Future;
use std::pin::Pin;

use uplift_protocol::{InitiateUploadRequest, InitiateUploadResponse, UploadStatusResponse};

pub use http::{CHUNK_TIMEOUT, DEFAULT_BASE_URL, HttpTransport, REQUEST_TIMEOUT};
pub use retry::{RetryConfig, backoff_delay, is_retryable, with_retry};

/// Errors produced by the transport crate.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request never produced an HTTP response (network, DNS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Abstract connection to the upload server.
///
/// The engine depends on this trait rather than on reqwest directly, which
/// keeps the chunk loop testable with scripted mocks.
pub trait Transport: Send + Sync {
    /// `POST /initiate`: registers the upload and returns the server id.
    fn initiate(
        &self,
        req: InitiateUploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<InitiateUploadResponse, TransportError>> + Send + '_>>;

    /// `POST /{id}/chunk`: multipart upload of one chunk.
    fn upload_chunk(
        &self,
        id: &str,
        chunk_index: u32,
        total_chunks: u32,
        data: Vec<u8>,
        filename: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;

    /// `POST /{id}/complete`.
    fn complete(&self, id: &str)
    -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;

    /// `POST /{id}/pause`.
    fn pause(&self, id: &str)
    -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;

    /// `POST /{id}/resume`.
    fn resume(&self, id: &str)
    -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;

    /// `GET /{id}/status`: the server's authoritative view.
    fn status(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<UploadStatusResponse, TransportError>> + Send + '_>>;

    /// `DELETE /{id}`.
    fn cancel(&self, id: &str)
    -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;
}
