//! Engine error types.

use uplift_store::StoreError;
use uplift_transport::TransportError;

/// Errors produced by upload operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("upload not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("file for upload {0} is not available")]
    MissingFile(String),

    #[error("network offline")]
    Offline,

    #[error("upload {0} has not been acknowledged by the server yet")]
    TempUpload(String),
}
