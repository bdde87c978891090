//! Durable local stores for the upload engine.
//!
//! [`BlobStore`] keeps file binaries on disk keyed by upload id so they
//! survive restarts; [`MetaStore`] is the authoritative in-memory map of
//! upload records with a persistence middleware, schema migration and
//! change subscribers.

mod blob;
mod meta;
mod migrate;

pub use blob::{BlobEntry, BlobStore};
pub use meta::{MetaStore, SubscriptionId, UiState};
pub use migrate::SCHEMA_VERSION;

/// Errors produced by the store crate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
