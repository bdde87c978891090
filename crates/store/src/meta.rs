//! Authoritative in-memory view of all upload records.
//!
//! Every mutation persists a filtered projection (records without blobs or
//! UI state) to the backing file and notifies subscribers. Persistence
//! failures degrade to a warning; the run proceeds.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use uplift_protocol::{UploadRecord, UploadStatus};

use crate::StoreError;
use crate::migrate::{SCHEMA_VERSION, migrate};

/// Transient per-process flags consumed by the presentation layer.
/// Never persisted; rebuilt on load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UiState {
    pub is_loading: bool,
    pub error: Option<String>,
    pub is_offline: bool,
    pub is_resuming: bool,
    pub drag_over: bool,
}

/// Handle returned by [`MetaStore::subscribe`], used to unsubscribe.
pub type SubscriptionId = u64;

type Subscriber = Box<dyn Fn() + Send + Sync>;

#[derive(Serialize, Deserialize)]
struct PersistedState {
    version: u32,
    uploads: BTreeMap<String, UploadRecord>,
}

struct Inner {
    uploads: BTreeMap<String, UploadRecord>,
    ui: UiState,
}

/// In-memory record map with persistence middleware and change pub/sub.
pub struct MetaStore {
    inner: RwLock<Inner>,
    path: Option<PathBuf>,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: AtomicU64,
}

impl MetaStore {
    /// Creates an in-memory store with no persistence backing.
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(Inner {
                uploads: BTreeMap::new(),
                ui: UiState::default(),
            }),
            path: None,
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Rehydrates the store from `path`, migrating older schema versions.
    ///
    /// An unreadable or corrupt file starts the store empty rather than
    /// failing startup; records that cannot be repaired to satisfy the
    /// chunk-set invariants are dropped.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut uploads = BTreeMap::new();

        match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(raw) => {
                    let version = raw
                        .get("version")
                        .and_then(Value::as_u64)
                        .unwrap_or(1) as u32;
                    let migrated = migrate(raw, version);
                    match serde_json::from_value::<PersistedState>(migrated) {
                        Ok(state) => {
                            for (id, mut record) in state.uploads {
                                if !repair(&mut record) {
                                    warn!(upload_id = %id, "dropping unrepairable record");
                                    continue;
                                }
                                uploads.insert(id, record);
                            }
                        }
                        Err(e) => warn!(error = %e, "persisted state unreadable, starting empty"),
                    }
                }
                Err(e) => warn!(error = %e, "persisted state is not JSON, starting empty"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!(records = uploads.len(), path = %path.display(), "metadata rehydrated");
        Ok(Self {
            inner: RwLock::new(Inner {
                uploads,
                ui: UiState::default(),
            }),
            path: Some(path),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        })
    }

    // -----------------------------------------------------------------------
    // Record operations
    // -----------------------------------------------------------------------

    /// Inserts or replaces a record.
    pub fn add(&self, record: UploadRecord) {
        self.mutate(|inner| {
            inner.uploads.insert(record.upload_id.clone(), record);
        });
    }

    /// Applies `f` to the record, if present. Returns whether it existed.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut UploadRecord)) -> bool {
        self.mutate(|inner| match inner.uploads.get_mut(id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        })
    }

    /// Removes and returns the record, if present.
    pub fn remove(&self, id: &str) -> Option<UploadRecord> {
        self.mutate(|inner| inner.uploads.remove(id))
    }

    pub fn set_status(&self, id: &str, status: UploadStatus) -> bool {
        self.update(id, |record| record.status = status)
    }

    /// Appends a user-visible error to the record.
    pub fn record_error(&self, id: &str, message: &str) -> bool {
        self.update(id, |record| record.record_error(message))
    }

    /// Authoritatively replaces the chunk set and recomputes the derived
    /// byte/progress fields. Callers never write those fields directly.
    pub fn update_progress(
        &self,
        id: &str,
        chunks: Vec<u32>,
        chunk_size: u64,
        filesize: u64,
    ) -> bool {
        self.update(id, |record| {
            record.apply_chunk_size(chunk_size);
            record.filesize = filesize;
            record.set_uploaded_chunks(chunks);
        })
    }

    pub fn get_upload(&self, id: &str) -> Option<UploadRecord> {
        self.read(|inner| inner.uploads.get(id).cloned())
    }

    pub fn get_uploads(&self) -> Vec<UploadRecord> {
        self.read(|inner| inner.uploads.values().cloned().collect())
    }

    /// Records the engine may still move forward (`Pending`, `Uploading`,
    /// `Paused`).
    pub fn get_active_uploads(&self) -> Vec<UploadRecord> {
        self.read(|inner| {
            inner
                .uploads
                .values()
                .filter(|r| r.status.is_active())
                .cloned()
                .collect()
        })
    }

    pub fn upload_ids(&self) -> Vec<String> {
        self.read(|inner| inner.uploads.keys().cloned().collect())
    }

    /// Removes records matching `filename` and `filesize` that are either
    /// older than 24 hours or already `Failed`/`Canceled`. Other records are
    /// preserved. Returns the removed ids so callers can drop their blobs.
    pub fn clear_stale_uploads(&self, filename: &str, filesize: u64) -> Vec<String> {
        let cutoff = Utc::now() - Duration::hours(24);
        self.mutate(|inner| {
            let stale: Vec<String> = inner
                .uploads
                .values()
                .filter(|r| {
                    r.filename == filename
                        && r.filesize == filesize
                        && (r.created_at < cutoff
                            || matches!(r.status, UploadStatus::Failed | UploadStatus::Canceled))
                })
                .map(|r| r.upload_id.clone())
                .collect();
            for id in &stale {
                inner.uploads.remove(id);
            }
            stale
        })
    }

    /// Removes every record.
    pub fn clear_all(&self) {
        self.mutate(|inner| inner.uploads.clear());
    }

    // -----------------------------------------------------------------------
    // UI state
    // -----------------------------------------------------------------------

    pub fn ui_state(&self) -> UiState {
        self.read(|inner| inner.ui.clone())
    }

    pub fn is_offline(&self) -> bool {
        self.read(|inner| inner.ui.is_offline)
    }

    pub fn set_loading(&self, loading: bool) {
        self.mutate(|inner| inner.ui.is_loading = loading);
    }

    pub fn set_error(&self, error: Option<String>) {
        self.mutate(|inner| inner.ui.error = error);
    }

    pub fn set_offline(&self, offline: bool) {
        self.mutate(|inner| inner.ui.is_offline = offline);
    }

    pub fn set_resuming(&self, resuming: bool) {
        self.mutate(|inner| inner.ui.is_resuming = resuming);
    }

    /// Acquires the process-wide resume guard. Returns `false` when another
    /// resume is already in flight.
    pub fn try_acquire_resuming(&self) -> bool {
        self.mutate(|inner| {
            if inner.ui.is_resuming {
                false
            } else {
                inner.ui.is_resuming = true;
                true
            }
        })
    }

    pub fn set_drag_over(&self, drag_over: bool) {
        self.mutate(|inner| inner.ui.drag_over = drag_over);
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Registers a change callback fired after every mutation.
    pub fn subscribe(&self, callback: Box<dyn Fn() + Send + Sync>) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap()
            .push((id, callback));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|(sub_id, _)| *sub_id != id);
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        let inner = self.inner.read().unwrap();
        f(&inner)
    }

    /// Applies a mutation, persists the projection, notifies subscribers.
    fn mutate<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let (result, projection) = {
            let mut inner = self.inner.write().unwrap();
            let result = f(&mut inner);
            let projection = self.path.as_ref().map(|_| {
                serde_json::to_vec(&PersistedState {
                    version: SCHEMA_VERSION,
                    uploads: inner.uploads.clone(),
                })
            });
            (result, projection)
        };

        if let (Some(path), Some(projection)) = (&self.path, projection) {
            match projection {
                Ok(bytes) => {
                    let tmp = path.with_extension("json.tmp");
                    let write = std::fs::write(&tmp, &bytes)
                        .and_then(|()| std::fs::rename(&tmp, path));
                    if let Err(e) = write {
                        warn!(error = %e, "failed to persist upload metadata");
                    }
                }
                Err(e) => warn!(error = %e, "failed to serialize upload metadata"),
            }
        }

        let subscribers = self.subscribers.lock().unwrap();
        for (_, callback) in subscribers.iter() {
            callback();
        }

        result
    }
}

/// Re-establishes the record invariants after rehydration. Returns `false`
/// when the record is beyond repair.
fn repair(record: &mut UploadRecord) -> bool {
    if record.chunk_size == 0 || record.upload_id.is_empty() {
        return false;
    }
    record.total_chunks = uplift_protocol::total_chunks(record.filesize, record.chunk_size);
    let chunks = std::mem::take(&mut record.uploaded_chunks);
    record.set_uploaded_chunks(chunks);
    true
}
