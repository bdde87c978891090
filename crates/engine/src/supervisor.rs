//! Process-level lifecycle orchestration.
//!
//! Runs once at startup to reconcile rehydrated records against the server
//! and restore their blobs, then reacts to connectivity and focus signals
//! from the host for the life of the process. Per-upload failures are
//! isolated; nothing here propagates out of the loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use uplift_protocol::UploadStatus;

use crate::engine::{RECONCILE_FAILED_MESSAGE, UploadEngine};

/// Recorded on records whose blob could not be restored after a reload.
pub const RESTORE_FAILED_MESSAGE: &str =
    "File could not be restored after reload. Please add it again.";

/// Connectivity and focus events delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    Online,
    Offline,
    Focus,
}

/// Startup behavior knobs.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Resume interrupted uploads automatically after rehydration.
    pub auto_resume_on_reload: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            auto_resume_on_reload: true,
        }
    }
}

/// Fans process-wide events out to per-upload engine operations.
pub struct Supervisor {
    engine: Arc<UploadEngine>,
}

impl Supervisor {
    pub fn new(engine: Arc<UploadEngine>) -> Self {
        Self { engine }
    }

    /// Startup pass over every rehydrated record: reconcile with the
    /// server, restore missing blobs, then optionally auto-resume.
    pub async fn init_after_rehydrate(&self, options: &SupervisorOptions) {
        let meta = self.engine.meta();
        for id in meta.upload_ids() {
            if let Err(e) = self.engine.refresh_status(&id).await {
                warn!(upload_id = %id, error = %e, "startup reconcile failed");
                meta.record_error(&id, RECONCILE_FAILED_MESSAGE);
            }

            let Some(record) = meta.get_upload(&id) else {
                continue;
            };
            if record.status.is_active()
                && record.blob.is_none()
                && !self.engine.restore_blob(&id).await
            {
                warn!(upload_id = %id, "blob missing after reload");
                meta.update(&id, |r| {
                    r.status = UploadStatus::Failed;
                    r.record_error(RESTORE_FAILED_MESSAGE);
                });
                continue;
            }

            if options.auto_resume_on_reload && !meta.is_offline() {
                let Some(record) = meta.get_upload(&id) else {
                    continue;
                };
                if record.status.is_active()
                    && let Err(e) = self.engine.start_upload(&id).await
                {
                    debug!(upload_id = %id, error = %e, "auto-resume failed");
                }
            }
        }
        info!(
            records = meta.get_uploads().len(),
            "startup reconciliation finished"
        );
    }

    /// Marks the process offline and parks every in-flight upload.
    pub fn handle_offline(&self) {
        let meta = self.engine.meta();
        meta.set_offline(true);
        for record in meta.get_uploads() {
            if record.status == UploadStatus::Uploading {
                meta.update(&record.upload_id, |r| {
                    r.status = UploadStatus::Paused;
                    r.record_error("offline");
                });
            }
        }
        info!("network offline, uploads paused");
    }

    /// Clears the offline flag and resumes every paused upload,
    /// best-effort per record.
    pub async fn handle_online(&self) {
        let meta = self.engine.meta();
        meta.set_offline(false);
        info!("network online, resuming paused uploads");
        for record in meta.get_uploads() {
            if record.status == UploadStatus::Paused
                && let Err(e) = self.engine.resume_upload(&record.upload_id).await
            {
                debug!(
                    upload_id = %record.upload_id,
                    error = %e,
                    "resume after reconnect failed"
                );
            }
        }
    }

    /// Focus regained: reconcile every non-terminal record and pick work
    /// back up where the server left it.
    pub async fn handle_focus(&self) {
        let meta = self.engine.meta();
        for record in meta.get_uploads() {
            if record.status.is_terminal() {
                continue;
            }
            let id = record.upload_id;
            if let Err(e) = self.engine.refresh_status(&id).await {
                warn!(upload_id = %id, error = %e, "focus reconcile failed");
            }

            let Some(current) = meta.get_upload(&id) else {
                continue;
            };
            if !meta.is_offline()
                && current.status != UploadStatus::Completed
                && let Err(e) = self.engine.resume_upload(&id).await
            {
                debug!(upload_id = %id, error = %e, "resume on focus failed");
            }
        }
    }

    /// Runs the signal dispatch loop until the channel closes or `cancel`
    /// fires.
    pub fn spawn_signal_loop(
        self: Arc<Self>,
        mut signals: mpsc::Receiver<HostSignal>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("signal loop stopped");
                        break;
                    }
                    signal = signals.recv() => match signal {
                        Some(HostSignal::Offline) => self.handle_offline(),
                        Some(HostSignal::Online) => self.handle_online().await,
                        Some(HostSignal::Focus) => self.handle_focus().await,
                        None => break,
                    }
                }
            }
        })
    }
}
