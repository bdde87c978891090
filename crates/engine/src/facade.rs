//! Stable API surface for the presentation layer.
//!
//! [`Uploader`] wires the stores, transport, engine and supervisor together
//! behind one value the host owns. Input validation lives here; everything
//! behavioral is delegated to the engine.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use uplift_protocol::{Blob, DEFAULT_CHUNK_SIZE, TEMP_ID_PREFIX, UploadRecord};
use uplift_store::{BlobStore, MetaStore, SubscriptionId, UiState};
use uplift_transport::{DEFAULT_BASE_URL, HttpTransport, Transport};

use crate::engine::UploadEngine;
use crate::error::EngineError;
use crate::supervisor::{HostSignal, Supervisor, SupervisorOptions};

const META_FILE: &str = "resumable-uploads.json";
const BLOBS_DIR: &str = "blobs";

/// Host-supplied construction knobs.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Upload server endpoint.
    pub base_url: String,
    /// Directory for the metadata file and the blob store.
    pub data_dir: PathBuf,
    /// Resume interrupted uploads automatically after rehydration.
    pub auto_resume_on_reload: bool,
    /// Client-side chunk size; the server may still override per upload.
    pub chunk_size: u64,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            data_dir: PathBuf::from(".uplift"),
            auto_resume_on_reload: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Facade over the engine and supervisor.
pub struct Uploader {
    engine: Arc<UploadEngine>,
    supervisor: Arc<Supervisor>,
    options: SupervisorOptions,
    signals_tx: mpsc::Sender<HostSignal>,
    signals_rx: Mutex<Option<mpsc::Receiver<HostSignal>>>,
    cancel: CancellationToken,
}

impl Uploader {
    /// Builds the full stack: rehydrated metadata store, blob store and
    /// HTTP transport under `config.data_dir`/`config.base_url`.
    pub fn new(config: UploaderConfig) -> Result<Self, EngineError> {
        let meta = Arc::new(MetaStore::load(config.data_dir.join(META_FILE))?);
        let blobs = Arc::new(BlobStore::new(config.data_dir.join(BLOBS_DIR)));
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.base_url)?);
        Ok(Self::with_parts(
            meta,
            blobs,
            transport,
            config.chunk_size,
            SupervisorOptions {
                auto_resume_on_reload: config.auto_resume_on_reload,
            },
        ))
    }

    /// Assembles a facade from pre-built parts. Hosts with custom stores or
    /// transports (and tests) come through here.
    pub fn with_parts(
        meta: Arc<MetaStore>,
        blobs: Arc<BlobStore>,
        transport: Arc<dyn Transport>,
        chunk_size: u64,
        options: SupervisorOptions,
    ) -> Self {
        let engine = Arc::new(UploadEngine::new(meta, blobs, transport, chunk_size));
        let supervisor = Arc::new(Supervisor::new(Arc::clone(&engine)));
        let (signals_tx, signals_rx) = mpsc::channel(32);
        Self {
            engine,
            supervisor,
            options,
            signals_tx,
            signals_rx: Mutex::new(Some(signals_rx)),
            cancel: CancellationToken::new(),
        }
    }

    /// Runs startup reconciliation and spawns the connectivity/focus
    /// dispatch loop. Call once after construction.
    pub async fn init(&self) -> tokio::task::JoinHandle<()> {
        self.supervisor.init_after_rehydrate(&self.options).await;
        let signals = self
            .signals_rx
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| mpsc::channel(1).1);
        Arc::clone(&self.supervisor).spawn_signal_loop(signals, self.cancel.clone())
    }

    /// Feed for the host's connectivity and focus events.
    pub fn signal_sender(&self) -> mpsc::Sender<HostSignal> {
        self.signals_tx.clone()
    }

    /// Stops the signal dispatch loop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // -----------------------------------------------------------------------
    // Upload operations
    // -----------------------------------------------------------------------

    /// Registers a file for upload and returns its server-assigned id.
    ///
    /// Stale records for the same file (older than 24 h, or already failed
    /// or canceled) are cleared first. A live record for the same file that
    /// lost its blob is re-armed with the new bytes instead of initiating a
    /// duplicate.
    pub async fn add_upload(
        &self,
        filename: &str,
        filetype: &str,
        bytes: Vec<u8>,
    ) -> Result<String, EngineError> {
        if filename.is_empty() {
            return Err(EngineError::InvalidInput("filename is empty".into()));
        }
        if bytes.is_empty() {
            return Err(EngineError::InvalidInput("file is empty".into()));
        }
        let blob = Blob::new(bytes);

        let meta = self.engine.meta();
        for id in meta.clear_stale_uploads(filename, blob.len()) {
            if let Err(e) = self.engine.blobs().delete(&id).await {
                warn!(upload_id = %id, error = %e, "failed to delete stale blob");
            }
        }

        let reusable = meta.get_uploads().into_iter().find(|r| {
            r.filename == filename
                && r.filesize == blob.len()
                && r.needs_file
                && !r.status.is_terminal()
        });
        if let Some(existing) = reusable {
            let id = existing.upload_id;
            if let Err(e) = self.engine.blobs().put(&id, filename, &blob).await {
                warn!(upload_id = %id, error = %e, "failed to store blob");
            }
            meta.update(&id, |r| {
                r.blob = Some(blob);
                r.needs_file = false;
                r.clear_error();
            });
            return Ok(id);
        }

        self.engine.add_upload(filename, filetype, blob).await
    }

    pub async fn start_upload(&self, id: &str) -> Result<(), EngineError> {
        self.engine.start_upload(id).await
    }

    pub async fn pause_upload(&self, id: &str) -> Result<(), EngineError> {
        reject_temp(id)?;
        self.engine.pause_upload(id).await
    }

    pub async fn resume_upload(&self, id: &str) -> Result<(), EngineError> {
        reject_temp(id)?;
        self.engine.resume_upload(id).await
    }

    pub async fn cancel_upload(&self, id: &str) -> Result<(), EngineError> {
        reject_temp(id)?;
        self.engine.cancel_upload(id).await
    }

    pub async fn remove_upload(&self, id: &str) -> Result<(), EngineError> {
        self.engine.remove_upload(id).await
    }

    pub async fn clear_all(&self) {
        self.engine.clear_all().await;
    }

    /// Drops blobs whose records went cold more than `days` ago.
    pub async fn prune(&self, days: i64) -> Result<usize, EngineError> {
        Ok(self.engine.blobs().prune_older_than(days).await?)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_uploads(&self) -> Vec<UploadRecord> {
        self.engine.meta().get_uploads()
    }

    pub fn get_upload(&self, id: &str) -> Option<UploadRecord> {
        self.engine.meta().get_upload(id)
    }

    pub fn ui_state(&self) -> UiState {
        self.engine.meta().ui_state()
    }

    pub fn set_drag_over(&self, drag_over: bool) {
        self.engine.meta().set_drag_over(drag_over);
    }

    pub fn set_error(&self, error: Option<String>) {
        self.engine.meta().set_error(error);
    }

    pub fn subscribe(&self, callback: Box<dyn Fn() + Send + Sync>) -> SubscriptionId {
        self.engine.meta().subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.engine.meta().unsubscribe(id);
    }
}

/// Operations with a server round-trip never accept locally minted ids.
fn reject_temp(id: &str) -> Result<(), EngineError> {
    if id.starts_with(TEMP_ID_PREFIX) {
        Err(EngineError::TempUpload(id.to_string()))
    } else {
        Ok(())
    }
}
