//! Resumable upload engine.
//!
//! [`UploadEngine`] drives the per-upload state machine and chunk loop over
//! injected stores and transport; [`Supervisor`] handles process-level
//! lifecycle (rehydration, reconciliation, connectivity and focus signals);
//! [`Uploader`] is the stable facade exposed to the presentation layer.

mod engine;
mod error;
mod facade;
mod supervisor;

#[cfg(test)]
mod testutil;

pub use engine::{MISSING_FILE_MESSAGE, OFFLINE_MESSAGE, RECONCILE_FAILED_MESSAGE, UploadEngine};
pub use error::EngineError;
pub use facade::{Uploader, UploaderConfig};
pub use supervisor::{HostSignal, RESTORE_FAILED_MESSAGE, Supervisor, SupervisorOptions};

// Hosts see the record model and UI bag through the facade.
pub use uplift_protocol::{Blob, UploadRecord, UploadStatus};
pub use uplift_store::{SubscriptionId, UiState};
