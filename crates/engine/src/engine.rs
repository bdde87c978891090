//! Per-upload state machine and chunk loop.
//!
//! The engine owns no I/O of its own: it coordinates the metadata store,
//! the blob store and the transport it was constructed with. Chunk loops
//! run as spawned tasks and observe external transitions (pause, cancel,
//! offline) by re-reading the record each iteration; cancellation is
//! cooperative, never preemptive.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};

use uplift_protocol::{
    Blob, InitiateUploadRequest, TEMP_ID_PREFIX, UploadRecord, UploadStatus,
};
use uplift_store::{BlobStore, MetaStore};
use uplift_transport::Transport;

use crate::error::EngineError;

/// Recorded on records paused by a connectivity loss mid-transfer.
pub const OFFLINE_MESSAGE: &str = "Network offline. Upload paused.";

/// Recorded when the blob cannot be found locally and must be reselected.
pub const MISSING_FILE_MESSAGE: &str =
    "File is no longer available. Please reselect it to resume.";

/// Recorded when a server status reconciliation fails.
pub const RECONCILE_FAILED_MESSAGE: &str = "Could not verify upload status with the server.";

/// Drives the lifecycle of every upload record.
pub struct UploadEngine {
    meta: Arc<MetaStore>,
    blobs: Arc<BlobStore>,
    transport: Arc<dyn Transport>,
    chunk_size: u64,
    /// Ids with a chunk loop currently running; guarantees at most one loop
    /// per upload.
    active_loops: Mutex<HashSet<String>>,
}

impl UploadEngine {
    pub fn new(
        meta: Arc<MetaStore>,
        blobs: Arc<BlobStore>,
        transport: Arc<dyn Transport>,
        chunk_size: u64,
    ) -> Self {
        Self {
            meta,
            blobs,
            transport,
            chunk_size,
            active_loops: Mutex::new(HashSet::new()),
        }
    }

    pub fn meta(&self) -> &Arc<MetaStore> {
        &self.meta
    }

    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Registers a new upload with the server.
    ///
    /// A `temp_` record exists only between local registration and the
    /// server's acknowledgment; on initiate failure it is removed and
    /// nothing persists.
    pub async fn add_upload(
        &self,
        filename: &str,
        filetype: &str,
        blob: Blob,
    ) -> Result<String, EngineError> {
        if blob.is_empty() {
            return Err(EngineError::InvalidInput("file is empty".into()));
        }

        let filesize = blob.len();
        let temp_id = format!("{TEMP_ID_PREFIX}{}", Utc::now().timestamp_millis());
        let temp = UploadRecord::new(&temp_id, filename, filetype, filesize, self.chunk_size)
            .with_blob(blob.clone());
        self.meta.add(temp);

        let initiate = self
            .transport
            .initiate(InitiateUploadRequest {
                filename: filename.to_string(),
                filetype: filetype.to_string(),
                filesize,
            })
            .await;

        let resp = match initiate {
            Ok(resp) => resp,
            Err(e) => {
                self.meta.remove(&temp_id);
                warn!(filename, error = %e, "initiate failed");
                return Err(e.into());
            }
        };

        self.meta.remove(&temp_id);

        let mut record =
            UploadRecord::new(&resp.upload_id, filename, filetype, filesize, self.chunk_size)
                .with_blob(blob.clone());
        if let Some(chunk_size) = resp.chunk_size {
            record.apply_chunk_size(chunk_size);
        }
        record.s3_key = resp.s3_key;
        record.status = UploadStatus::Pending;

        if let Err(e) = self.blobs.put(&resp.upload_id, filename, &blob).await {
            warn!(upload_id = %resp.upload_id, error = %e, "failed to store blob");
        }
        self.meta.add(record);

        info!(
            upload_id = %resp.upload_id,
            filename,
            filesize,
            "upload registered"
        );
        Ok(resp.upload_id)
    }

    /// Transitions `Pending`/`Paused` records to `Uploading` and spawns the
    /// chunk loop. Offline or missing-blob conditions park the record in
    /// `Paused` with a user-facing error instead.
    pub async fn start_upload(self: &Arc<Self>, id: &str) -> Result<(), EngineError> {
        let record = self
            .meta
            .get_upload(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        match record.status {
            UploadStatus::Pending | UploadStatus::Paused => {}
            UploadStatus::Uploading => {
                // Already running; the active-loop guard makes this a no-op.
                self.spawn_chunk_loop(id);
                return Ok(());
            }
            other => {
                return Err(EngineError::InvalidInput(format!(
                    "cannot start upload in state {other}"
                )));
            }
        }

        if self.meta.is_offline() {
            self.meta.update(id, |r| {
                r.status = UploadStatus::Paused;
                r.record_error(OFFLINE_MESSAGE);
            });
            return Err(EngineError::Offline);
        }

        if !self.ensure_file_available(id).await {
            return Err(EngineError::MissingFile(id.to_string()));
        }

        self.meta.update(id, |r| {
            r.status = UploadStatus::Uploading;
            r.clear_error();
        });
        self.spawn_chunk_loop(id);
        Ok(())
    }

    /// Notifies the server (best-effort) and parks the record in `Paused`.
    /// The running chunk loop observes the transition on its next iteration.
    pub async fn pause_upload(&self, id: &str) -> Result<(), EngineError> {
        let record = self
            .meta
            .get_upload(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if record.status != UploadStatus::Uploading {
            return Err(EngineError::InvalidInput(format!(
                "cannot pause upload in state {}",
                record.status
            )));
        }

        if !record.is_temp()
            && let Err(e) = self.transport.pause(id).await
        {
            warn!(upload_id = %id, error = %e, "server pause notification failed");
        }
        self.meta.set_status(id, UploadStatus::Paused);
        debug!(upload_id = %id, "upload paused");
        Ok(())
    }

    /// Resumes a paused upload.
    ///
    /// Guarded by the process-wide `is_resuming` flag so user clicks, focus
    /// events and the online handler cannot race; re-entry returns
    /// immediately. The guard is released on every exit path.
    pub async fn resume_upload(self: &Arc<Self>, id: &str) -> Result<(), EngineError> {
        let record = self
            .meta
            .get_upload(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        if record.status.is_terminal() {
            return Ok(());
        }
        if record.status == UploadStatus::Uploading {
            self.spawn_chunk_loop(id);
            return Ok(());
        }

        if !self.meta.try_acquire_resuming() {
            debug!(upload_id = %id, "resume already in flight");
            return Ok(());
        }
        let _guard = ResumeGuard { meta: &self.meta };

        if self.meta.is_offline() {
            self.meta.update(id, |r| {
                r.status = UploadStatus::Paused;
                r.record_error(OFFLINE_MESSAGE);
            });
            return Err(EngineError::Offline);
        }

        if !record.is_temp()
            && let Err(e) = self.transport.resume(id).await
        {
            warn!(upload_id = %id, error = %e, "server resume notification failed");
        }

        if !self.ensure_file_available(id).await {
            return Err(EngineError::MissingFile(id.to_string()));
        }

        self.meta.update(id, |r| {
            r.status = UploadStatus::Uploading;
            r.clear_error();
        });
        self.spawn_chunk_loop(id);
        Ok(())
    }

    /// Cancels a non-terminal upload.
    ///
    /// The record and blob are removed locally even when the server DELETE
    /// fails; the server error is then returned to the caller.
    pub async fn cancel_upload(&self, id: &str) -> Result<(), EngineError> {
        let record = self
            .meta
            .get_upload(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if record.status.is_terminal() {
            return Err(EngineError::InvalidInput(format!(
                "cannot cancel upload in state {}",
                record.status
            )));
        }

        let server_result = if record.is_temp() {
            Ok(())
        } else {
            self.transport.cancel(id).await
        };

        self.meta.remove(id);
        if let Err(e) = self.blobs.delete(id).await {
            warn!(upload_id = %id, error = %e, "failed to delete blob");
        }
        info!(upload_id = %id, "upload canceled");

        server_result.map_err(Into::into)
    }

    /// Deletes the record locally; the server DELETE is best-effort for
    /// acknowledged, non-completed uploads. Local removal always succeeds.
    pub async fn remove_upload(&self, id: &str) -> Result<(), EngineError> {
        let Some(record) = self.meta.remove(id) else {
            return Ok(());
        };
        if let Err(e) = self.blobs.delete(id).await {
            warn!(upload_id = %id, error = %e, "failed to delete blob");
        }

        if record.status != UploadStatus::Completed
            && !record.is_temp()
            && let Err(e) = self.transport.cancel(id).await
        {
            warn!(upload_id = %id, error = %e, "server delete failed");
        }
        debug!(upload_id = %id, "upload removed");
        Ok(())
    }

    /// Removes every record and blob. Best-effort on the blob side.
    pub async fn clear_all(&self) {
        self.meta.clear_all();
        if let Err(e) = self.blobs.clear().await {
            warn!(error = %e, "failed to clear blob store");
        }
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Fetches the server's view and overwrites local progress with it.
    ///
    /// This is the only path allowed to shrink the chunk set. A reported
    /// `completed` or `paused` status is adopted; the chunk loop observes
    /// the change on its next iteration.
    pub async fn refresh_status(&self, id: &str) -> Result<(), EngineError> {
        let Some(record) = self.meta.get_upload(id) else {
            return Ok(());
        };
        if record.is_temp() {
            return Ok(());
        }

        let resp = self.transport.status(id).await?;
        self.meta.update_progress(
            id,
            resp.uploaded_chunks.clone(),
            record.chunk_size,
            record.filesize,
        );

        match resp.remote_status() {
            Some(UploadStatus::Completed) => {
                self.meta.update(id, |r| {
                    r.status = UploadStatus::Completed;
                    r.set_uploaded_chunks((0..r.total_chunks).collect());
                    r.clear_error();
                    r.blob = None;
                });
                if let Err(e) = self.blobs.delete(id).await {
                    warn!(upload_id = %id, error = %e, "failed to delete blob");
                }
                info!(upload_id = %id, "server reports upload completed");
            }
            Some(UploadStatus::Paused) => {
                self.meta.update(id, |r| {
                    if !r.status.is_terminal() {
                        r.status = UploadStatus::Paused;
                    }
                });
                debug!(upload_id = %id, "server reports upload paused");
            }
            _ => {}
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Chunk loop
    // -----------------------------------------------------------------------

    /// Spawns the chunk loop for `id` unless one is already running.
    fn spawn_chunk_loop(self: &Arc<Self>, id: &str) {
        {
            let mut active = self.active_loops.lock().unwrap();
            if !active.insert(id.to_string()) {
                debug!(upload_id = %id, "chunk loop already running");
                return;
            }
        }

        let engine = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            engine.run_chunk_loop(&id).await;
            engine.active_loops.lock().unwrap().remove(&id);
        });
    }

    /// Uploads all missing chunks in strict ascending index order, then
    /// finalizes with the server.
    async fn run_chunk_loop(&self, id: &str) {
        if let Err(e) = self.refresh_status(id).await {
            warn!(upload_id = %id, error = %e, "status reconciliation failed");
        }

        let Some(record) = self.meta.get_upload(id) else {
            return;
        };
        if record.status != UploadStatus::Uploading {
            debug!(upload_id = %id, status = %record.status, "chunk loop not entered");
            return;
        }

        for index in 0..record.total_chunks {
            if self.meta.is_offline() {
                self.meta.update(id, |r| {
                    r.status = UploadStatus::Paused;
                    r.record_error(OFFLINE_MESSAGE);
                });
                debug!(upload_id = %id, "went offline mid-loop");
                return;
            }

            // Re-read: pause/cancel may have happened while a chunk was in
            // flight.
            let Some(current) = self.meta.get_upload(id) else {
                return;
            };
            if current.status != UploadStatus::Uploading {
                debug!(upload_id = %id, status = %current.status, "chunk loop exiting");
                return;
            }
            if current.has_chunk(index) {
                continue;
            }

            if !self.upload_chunk(id, index).await {
                return;
            }
        }

        match self.transport.complete(id).await {
            Ok(()) => {
                self.meta.update(id, |r| {
                    r.status = UploadStatus::Completed;
                    r.clear_error();
                    r.blob = None;
                });
                if let Err(e) = self.blobs.delete(id).await {
                    warn!(upload_id = %id, error = %e, "failed to delete blob");
                }
                info!(upload_id = %id, "upload completed");
            }
            Err(e) => {
                self.meta.update(id, |r| {
                    r.status = UploadStatus::Failed;
                    r.record_error(e.to_string());
                });
                warn!(upload_id = %id, error = %e, "complete failed");
            }
        }
    }

    /// Posts one chunk. Returns `false` when the loop must stop; the record
    /// has then already been parked with an error.
    async fn upload_chunk(&self, id: &str, index: u32) -> bool {
        if !self.ensure_file_available(id).await {
            return false;
        }
        if self.meta.is_offline() {
            self.meta.update(id, |r| {
                r.status = UploadStatus::Paused;
                r.record_error(OFFLINE_MESSAGE);
            });
            return false;
        }

        let Some(record) = self.meta.get_upload(id) else {
            return false;
        };
        let Some(blob) = record.blob.clone() else {
            return false;
        };

        let start = u64::from(index) * record.chunk_size;
        let end = (start + record.chunk_size).min(record.filesize);
        let data = blob.slice(start, end);

        match self
            .transport
            .upload_chunk(id, index, record.total_chunks, data, &record.filename)
            .await
        {
            Ok(()) => {
                self.meta.update(id, |r| r.mark_chunk_uploaded(index));
                true
            }
            Err(e) => {
                warn!(upload_id = %id, chunk = index, error = %e, "chunk upload failed");
                self.meta.update(id, |r| {
                    r.status = UploadStatus::Paused;
                    r.record_error(e.to_string());
                });
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Blob availability
    // -----------------------------------------------------------------------

    /// Makes sure the record carries a usable blob, restoring it from the
    /// blob store if needed. On failure the record is parked in `Paused`
    /// with `needs_file` set.
    pub async fn ensure_file_available(&self, id: &str) -> bool {
        let Some(record) = self.meta.get_upload(id) else {
            return false;
        };
        if let Some(blob) = &record.blob
            && !blob.is_empty()
        {
            return true;
        }

        match self.blobs.get(id).await {
            Ok(Some(blob)) if !blob.is_empty() => {
                self.meta.update(id, |r| {
                    r.blob = Some(blob);
                    r.needs_file = false;
                    r.clear_error();
                });
                true
            }
            Ok(_) => {
                self.mark_file_missing(id);
                false
            }
            Err(e) => {
                warn!(upload_id = %id, error = %e, "blob store read failed");
                self.mark_file_missing(id);
                false
            }
        }
    }

    /// Restores the blob from the blob store without parking the record.
    /// Used by the supervisor, which applies its own failure policy.
    pub async fn restore_blob(&self, id: &str) -> bool {
        match self.blobs.get(id).await {
            Ok(Some(blob)) if !blob.is_empty() => self.meta.update(id, |r| {
                r.blob = Some(blob);
                r.needs_file = false;
            }),
            Ok(_) => false,
            Err(e) => {
                warn!(upload_id = %id, error = %e, "blob store read failed");
                false
            }
        }
    }

    fn mark_file_missing(&self, id: &str) {
        self.meta.update(id, |r| {
            r.needs_file = true;
            r.status = UploadStatus::Paused;
            r.record_error(MISSING_FILE_MESSAGE);
        });
    }
}

/// Releases the process-wide resume guard on every exit path.
struct ResumeGuard<'a> {
    meta: &'a MetaStore,
}

impl Drop for ResumeGuard<'_> {
    fn drop(&mut self) {
        self.meta.set_resuming(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockTransport, harness, wait_for_status, wait_until};
    use uplift_protocol::InitiateUploadResponse;
    use uplift_protocol::UploadStatusResponse;

    #[tokio::test]
    async fn add_upload_registers_pending_record() {
        let (engine, mock, _tmp) = harness().await;

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new(vec![7u8; 10]))
            .await
            .unwrap();

        assert_eq!(id, "srv-1");
        let rec = engine.meta().get_upload(&id).unwrap();
        assert_eq!(rec.status, UploadStatus::Pending);
        assert_eq!(rec.filesize, 10);
        assert_eq!(rec.total_chunks, 3); // 10 bytes at 4-byte chunks
        assert!(rec.blob.is_some());
        assert_eq!(mock.calls(), vec!["initiate"]);
        // Blob is durable.
        assert!(engine.blobs().get(&id).await.unwrap().is_some());
        // No temp record remains.
        assert_eq!(engine.meta().get_uploads().len(), 1);
    }

    #[tokio::test]
    async fn add_upload_applies_server_overrides() {
        let (engine, mock, _tmp) = harness().await;
        mock.set_initiate(Ok(InitiateUploadResponse {
            upload_id: "srv-2".into(),
            s3_key: Some("k/srv-2".into()),
            chunk_size: Some(5),
            total_chunks: None,
        }));

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new(vec![7u8; 12]))
            .await
            .unwrap();

        let rec = engine.meta().get_upload(&id).unwrap();
        assert_eq!(rec.chunk_size, 5);
        assert_eq!(rec.total_chunks, 3); // ceil(12 / 5)
        assert_eq!(rec.s3_key.as_deref(), Some("k/srv-2"));
    }

    #[tokio::test]
    async fn add_upload_initiate_failure_leaves_nothing() {
        let (engine, mock, _tmp) = harness().await;
        mock.set_initiate(Err(400));

        let err = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new(vec![1]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));
        assert!(engine.meta().get_uploads().is_empty());
    }

    #[tokio::test]
    async fn add_upload_rejects_empty_blob() {
        let (engine, _mock, _tmp) = harness().await;
        let err = engine
            .add_upload("empty.bin", "application/octet-stream", Blob::new(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn happy_path_uploads_all_chunks_and_completes() {
        let (engine, mock, _tmp) = harness().await;

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new((0u8..10).collect()))
            .await
            .unwrap();
        engine.start_upload(&id).await.unwrap();
        wait_for_status(engine.meta(), &id, UploadStatus::Completed).await;

        let rec = engine.meta().get_upload(&id).unwrap();
        assert_eq!(rec.uploaded_chunks, vec![0, 1, 2]);
        assert_eq!(rec.uploaded_bytes, 10);
        assert_eq!(rec.progress, 100.0);
        assert!(rec.blob.is_none());

        let calls = mock.calls();
        assert!(calls.contains(&"chunk:0".to_string()));
        assert!(calls.contains(&"chunk:1".to_string()));
        assert!(calls.contains(&"chunk:2".to_string()));
        assert!(calls.contains(&"complete".to_string()));
        // Chunks go out in ascending order.
        let chunk_calls: Vec<&String> =
            calls.iter().filter(|c| c.starts_with("chunk:")).collect();
        assert_eq!(chunk_calls, vec!["chunk:0", "chunk:1", "chunk:2"]);
        // Blob is dropped once completed.
        assert!(engine.blobs().get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chunk_payloads_slice_the_blob() {
        let (engine, mock, _tmp) = harness().await;

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new((0u8..10).collect()))
            .await
            .unwrap();
        engine.start_upload(&id).await.unwrap();
        wait_for_status(engine.meta(), &id, UploadStatus::Completed).await;

        let chunks = mock.chunk_payloads();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], vec![0, 1, 2, 3]);
        assert_eq!(chunks[1], vec![4, 5, 6, 7]);
        assert_eq!(chunks[2], vec![8, 9]); // ragged last chunk
    }

    #[tokio::test]
    async fn reconcile_skips_server_acknowledged_chunks() {
        let (engine, mock, _tmp) = harness().await;
        mock.push_status(UploadStatusResponse {
            status: "uploading".into(),
            uploaded_chunks: vec![0],
        });

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new((0u8..10).collect()))
            .await
            .unwrap();
        engine.start_upload(&id).await.unwrap();
        wait_for_status(engine.meta(), &id, UploadStatus::Completed).await;

        let calls = mock.calls();
        assert!(!calls.contains(&"chunk:0".to_string()));
        assert!(calls.contains(&"chunk:1".to_string()));
        assert!(calls.contains(&"chunk:2".to_string()));
    }

    #[tokio::test]
    async fn reconcile_shrinks_local_set_when_server_is_behind() {
        let (engine, mock, _tmp) = harness().await;

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new((0u8..10).collect()))
            .await
            .unwrap();
        // Local view claims everything is uploaded; the server disagrees.
        engine.meta().update(&id, |r| {
            r.set_uploaded_chunks(vec![0, 1, 2]);
        });
        mock.push_status(UploadStatusResponse {
            status: "uploading".into(),
            uploaded_chunks: vec![0],
        });

        engine.start_upload(&id).await.unwrap();
        wait_for_status(engine.meta(), &id, UploadStatus::Completed).await;

        let calls = mock.calls();
        assert!(calls.contains(&"chunk:1".to_string()));
        assert!(calls.contains(&"chunk:2".to_string()));
    }

    #[tokio::test]
    async fn server_completed_short_circuits_the_loop() {
        let (engine, mock, _tmp) = harness().await;
        mock.push_status(UploadStatusResponse {
            status: "completed".into(),
            uploaded_chunks: vec![0, 1, 2],
        });

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new((0u8..10).collect()))
            .await
            .unwrap();
        engine.start_upload(&id).await.unwrap();
        wait_for_status(engine.meta(), &id, UploadStatus::Completed).await;

        let rec = engine.meta().get_upload(&id).unwrap();
        assert_eq!(rec.uploaded_chunks.len(), rec.total_chunks as usize);
        let calls = mock.calls();
        assert!(!calls.iter().any(|c| c.starts_with("chunk:")));
        assert!(!calls.contains(&"complete".to_string()));
    }

    #[tokio::test]
    async fn server_paused_stops_the_loop() {
        let (engine, mock, _tmp) = harness().await;
        mock.push_status(UploadStatusResponse {
            status: "paused".into(),
            uploaded_chunks: vec![],
        });

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new((0u8..10).collect()))
            .await
            .unwrap();
        engine.start_upload(&id).await.unwrap();
        wait_for_status(engine.meta(), &id, UploadStatus::Paused).await;

        assert!(!mock.calls().iter().any(|c| c.starts_with("chunk:")));
    }

    #[tokio::test]
    async fn chunk_failure_pauses_with_error() {
        let (engine, mock, _tmp) = harness().await;
        mock.fail_chunk(1, 404);

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new((0u8..10).collect()))
            .await
            .unwrap();
        engine.start_upload(&id).await.unwrap();
        wait_for_status(engine.meta(), &id, UploadStatus::Paused).await;

        let rec = engine.meta().get_upload(&id).unwrap();
        assert_eq!(rec.uploaded_chunks, vec![0]);
        assert!(rec.last_error.as_deref().unwrap().contains("404"));
        assert!(rec.last_error_at.is_some());
        assert!(!mock.calls().contains(&"complete".to_string()));
    }

    #[tokio::test]
    async fn complete_failure_marks_failed() {
        let (engine, mock, _tmp) = harness().await;
        mock.fail_complete(500);

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new((0u8..10).collect()))
            .await
            .unwrap();
        engine.start_upload(&id).await.unwrap();
        wait_for_status(engine.meta(), &id, UploadStatus::Failed).await;

        let rec = engine.meta().get_upload(&id).unwrap();
        assert!(rec.last_error.as_deref().unwrap().contains("500"));
        // All chunks made it before the finalize failed.
        assert_eq!(rec.uploaded_chunks, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn start_while_offline_pauses_with_message() {
        let (engine, mock, _tmp) = harness().await;

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new(vec![1, 2, 3]))
            .await
            .unwrap();
        engine.meta().set_offline(true);

        let err = engine.start_upload(&id).await.unwrap_err();
        assert!(matches!(err, EngineError::Offline));

        let rec = engine.meta().get_upload(&id).unwrap();
        assert_eq!(rec.status, UploadStatus::Paused);
        assert_eq!(rec.last_error.as_deref(), Some(OFFLINE_MESSAGE));
        assert!(!mock.calls().iter().any(|c| c.starts_with("chunk:")));
    }

    #[tokio::test]
    async fn offline_mid_loop_pauses_and_resume_finishes() {
        let (engine, mock, _tmp) = harness().await;
        mock.set_chunk_delay(std::time::Duration::from_millis(20));

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new((0u8..10).collect()))
            .await
            .unwrap();
        engine.start_upload(&id).await.unwrap();

        // Let the first chunk go out, then flip offline.
        wait_until(|| mock.calls().contains(&"chunk:0".to_string())).await;
        engine.meta().set_offline(true);
        wait_for_status(engine.meta(), &id, UploadStatus::Paused).await;

        let rec = engine.meta().get_upload(&id).unwrap();
        assert_eq!(rec.last_error.as_deref(), Some(OFFLINE_MESSAGE));

        // Back online: resume drives it home.
        engine.meta().set_offline(false);
        engine.resume_upload(&id).await.unwrap();
        wait_for_status(engine.meta(), &id, UploadStatus::Completed).await;
        assert!(mock.calls().contains(&"resume".to_string()));
    }

    #[tokio::test]
    async fn pause_mid_upload_stops_the_loop() {
        let (engine, mock, _tmp) = harness().await;
        mock.set_chunk_delay(std::time::Duration::from_millis(20));

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new((0u8..10).collect()))
            .await
            .unwrap();
        engine.start_upload(&id).await.unwrap();
        wait_until(|| mock.calls().contains(&"chunk:0".to_string())).await;

        engine.pause_upload(&id).await.unwrap();
        wait_for_status(engine.meta(), &id, UploadStatus::Paused).await;

        // Give a paused loop a chance to misbehave, then check it didn't.
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        let rec = engine.meta().get_upload(&id).unwrap();
        assert_eq!(rec.status, UploadStatus::Paused);
        assert!(!mock.calls().contains(&"chunk:2".to_string()));
        assert!(mock.calls().contains(&"pause".to_string()));
    }

    #[tokio::test]
    async fn pause_survives_server_notification_failure() {
        let (engine, mock, _tmp) = harness().await;
        mock.set_chunk_delay(std::time::Duration::from_millis(20));
        mock.fail_pause(502);

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new((0u8..10).collect()))
            .await
            .unwrap();
        engine.start_upload(&id).await.unwrap();
        wait_until(|| mock.calls().contains(&"chunk:0".to_string())).await;

        engine.pause_upload(&id).await.unwrap();
        assert_eq!(
            engine.meta().get_upload(&id).unwrap().status,
            UploadStatus::Paused
        );
    }

    #[tokio::test]
    async fn resume_is_guarded_against_reentry() {
        let (engine, mock, _tmp) = harness().await;

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new(vec![1, 2, 3]))
            .await
            .unwrap();
        engine.meta().set_status(&id, UploadStatus::Paused);

        // Simulate a resume already in flight.
        assert!(engine.meta().try_acquire_resuming());
        engine.resume_upload(&id).await.unwrap();
        assert!(!mock.calls().contains(&"resume".to_string()));
        assert_eq!(
            engine.meta().get_upload(&id).unwrap().status,
            UploadStatus::Paused
        );

        // Released guard lets the real resume through.
        engine.meta().set_resuming(false);
        engine.resume_upload(&id).await.unwrap();
        wait_for_status(engine.meta(), &id, UploadStatus::Completed).await;
        // The guard is released again afterwards.
        assert!(!engine.meta().ui_state().is_resuming);
    }

    #[tokio::test]
    async fn resume_survives_server_notification_failure() {
        let (engine, mock, _tmp) = harness().await;
        mock.fail_resume(502);

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new((0u8..10).collect()))
            .await
            .unwrap();
        engine.meta().set_status(&id, UploadStatus::Paused);

        engine.resume_upload(&id).await.unwrap();
        wait_for_status(engine.meta(), &id, UploadStatus::Completed).await;
    }

    #[tokio::test]
    async fn duplicate_start_runs_one_loop() {
        let (engine, mock, _tmp) = harness().await;
        mock.set_chunk_delay(std::time::Duration::from_millis(10));

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new((0u8..10).collect()))
            .await
            .unwrap();
        engine.start_upload(&id).await.unwrap();
        engine.start_upload(&id).await.unwrap();
        wait_for_status(engine.meta(), &id, UploadStatus::Completed).await;

        let calls = mock.calls();
        let posts_of_zero = calls.iter().filter(|c| *c == "chunk:0").count();
        assert_eq!(posts_of_zero, 1);
    }

    #[tokio::test]
    async fn start_from_terminal_state_is_rejected() {
        let (engine, _mock, _tmp) = harness().await;
        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new(vec![1]))
            .await
            .unwrap();
        engine.meta().set_status(&id, UploadStatus::Failed);

        let err = engine.start_upload(&id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn missing_blob_pauses_with_needs_file() {
        let (engine, _mock, _tmp) = harness().await;

        // Record exists but neither the in-memory blob nor the stored one.
        let mut rec = UploadRecord::new("srv-9", "clip.mp4", "video/mp4", 10, 4);
        rec.status = UploadStatus::Pending;
        engine.meta().add(rec);

        let err = engine.start_upload("srv-9").await.unwrap_err();
        assert!(matches!(err, EngineError::MissingFile(_)));

        let rec = engine.meta().get_upload("srv-9").unwrap();
        assert_eq!(rec.status, UploadStatus::Paused);
        assert!(rec.needs_file);
        assert_eq!(rec.last_error.as_deref(), Some(MISSING_FILE_MESSAGE));
    }

    #[tokio::test]
    async fn blob_restore_from_store_enables_start() {
        let (engine, _mock, _tmp) = harness().await;

        let mut rec = UploadRecord::new("srv-9", "clip.mp4", "video/mp4", 10, 4);
        rec.status = UploadStatus::Pending;
        engine.meta().add(rec);
        engine
            .blobs()
            .put("srv-9", "clip.mp4", &Blob::new((0u8..10).collect()))
            .await
            .unwrap();

        engine.start_upload("srv-9").await.unwrap();
        wait_for_status(engine.meta(), "srv-9", UploadStatus::Completed).await;
    }

    #[tokio::test]
    async fn cancel_removes_locally_even_when_server_fails() {
        let (engine, mock, _tmp) = harness().await;
        mock.fail_cancel(500);

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new(vec![1, 2]))
            .await
            .unwrap();

        let err = engine.cancel_upload(&id).await.unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));
        assert!(engine.meta().get_upload(&id).is_none());
        assert!(engine.blobs().get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_skips_server_for_temp_and_completed() {
        let (engine, mock, _tmp) = harness().await;

        let mut temp = UploadRecord::new("temp_123", "a.bin", "t", 4, 4);
        temp.status = UploadStatus::Initiating;
        engine.meta().add(temp);
        engine.remove_upload("temp_123").await.unwrap();

        let mut done = UploadRecord::new("srv-5", "b.bin", "t", 4, 4);
        done.status = UploadStatus::Completed;
        engine.meta().add(done);
        engine.remove_upload("srv-5").await.unwrap();

        assert!(!mock.calls().contains(&"cancel".to_string()));
        assert!(engine.meta().get_uploads().is_empty());
    }

    #[tokio::test]
    async fn remove_notifies_server_for_acknowledged_uploads() {
        let (engine, mock, _tmp) = harness().await;

        let id = engine
            .add_upload("clip.mp4", "video/mp4", Blob::new(vec![1, 2]))
            .await
            .unwrap();
        engine.remove_upload(&id).await.unwrap();
        assert!(mock.calls().contains(&"cancel".to_string()));
    }

    #[tokio::test]
    async fn refresh_status_skips_temp_records() {
        let (engine, mock, _tmp) = harness().await;
        let mut temp = UploadRecord::new("temp_7", "a.bin", "t", 4, 4);
        temp.status = UploadStatus::Initiating;
        engine.meta().add(temp);

        engine.refresh_status("temp_7").await.unwrap();
        assert!(!mock.calls().contains(&"status".to_string()));
    }
}
