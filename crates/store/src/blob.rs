//! Directory-backed keyed binary store.
//!
//! Each blob lives in `<root>/files/<key>.bin`; `<root>/index.json` carries
//! the per-key metadata (filename, filesize, createdAt) used for pruning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, warn};

use uplift_protocol::Blob;

use crate::StoreError;

const FILES_DIR: &str = "files";
const INDEX_FILE: &str = "index.json";

/// Index metadata kept per stored blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobEntry {
    pub filename: String,
    pub filesize: u64,
    pub created_at: DateTime<Utc>,
}

/// Keyed binary store surviving restarts.
///
/// Initialization is lazy and memoized: the first caller creates the
/// directory layout and loads the index, concurrent callers await the same
/// pending open. Index access is serialized behind one lock, which also
/// serializes per-key file operations.
pub struct BlobStore {
    root: PathBuf,
    open: OnceCell<()>,
    index: RwLock<HashMap<String, BlobEntry>>,
}

impl BlobStore {
    /// Creates a handle rooted at `root`. No I/O happens until first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open: OnceCell::new(),
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Writes or overwrites the blob stored under `key`.
    pub async fn put(&self, key: &str, filename: &str, blob: &Blob) -> Result<(), StoreError> {
        self.ensure_open().await?;

        let mut index = self.index.write().await;
        tokio::fs::write(self.data_path(key), blob.as_bytes()).await?;
        index.insert(
            key.to_string(),
            BlobEntry {
                filename: filename.to_string(),
                filesize: blob.len(),
                created_at: Utc::now(),
            },
        );
        self.persist_index(&index).await?;
        debug!(key, bytes = blob.len(), "blob stored");
        Ok(())
    }

    /// Returns the blob stored under `key`, or `None` when absent.
    pub async fn get(&self, key: &str) -> Result<Option<Blob>, StoreError> {
        self.ensure_open().await?;

        let index = self.index.read().await;
        if !index.contains_key(key) {
            return Ok(None);
        }
        match tokio::fs::read(self.data_path(key)).await {
            Ok(data) => Ok(Some(Blob::new(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(key, "blob indexed but data file missing");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the blob stored under `key`. Idempotent.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.ensure_open().await?;

        let mut index = self.index.write().await;
        match tokio::fs::remove_file(self.data_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if index.remove(key).is_some() {
            self.persist_index(&index).await?;
        }
        Ok(())
    }

    /// Removes every stored blob. Idempotent.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.ensure_open().await?;

        let mut index = self.index.write().await;
        for key in index.keys() {
            match tokio::fs::remove_file(self.data_path(key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(key, error = %e, "failed to remove blob data"),
            }
        }
        index.clear();
        self.persist_index(&index).await?;
        Ok(())
    }

    /// Removes blobs whose index entry predates `now − days`.
    ///
    /// Returns the number of removed entries.
    pub async fn prune_older_than(&self, days: i64) -> Result<usize, StoreError> {
        self.ensure_open().await?;

        let cutoff = Utc::now() - Duration::days(days);
        let mut index = self.index.write().await;
        let stale: Vec<String> = index
            .iter()
            .filter(|(_, entry)| entry.created_at < cutoff)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            match tokio::fs::remove_file(self.data_path(key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(key, error = %e, "failed to remove pruned blob"),
            }
            index.remove(key);
        }
        if !stale.is_empty() {
            self.persist_index(&index).await?;
            debug!(removed = stale.len(), days, "pruned old blobs");
        }
        Ok(stale.len())
    }

    /// Index metadata for `key`, if present.
    pub async fn entry(&self, key: &str) -> Result<Option<BlobEntry>, StoreError> {
        self.ensure_open().await?;
        Ok(self.index.read().await.get(key).cloned())
    }

    async fn ensure_open(&self) -> Result<(), StoreError> {
        self.open
            .get_or_try_init(|| async {
                tokio::fs::create_dir_all(self.root.join(FILES_DIR)).await?;
                let index_path = self.root.join(INDEX_FILE);
                match tokio::fs::read(&index_path).await {
                    Ok(bytes) => match serde_json::from_slice::<HashMap<String, BlobEntry>>(&bytes)
                    {
                        Ok(loaded) => {
                            *self.index.write().await = loaded;
                        }
                        Err(e) => {
                            warn!(error = %e, "blob index unreadable, starting empty");
                        }
                    },
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(StoreError::from(e)),
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }

    async fn persist_index(&self, index: &HashMap<String, BlobEntry>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(index)?;
        let path = self.root.join(INDEX_FILE);
        let tmp = self.root.join(format!("{INDEX_FILE}.tmp"));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.root
            .join(FILES_DIR)
            .join(format!("{}.bin", sanitize_key(key)))
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Keys are upload ids (uuid-shaped or `temp_<millis>`); anything else is
/// mapped onto a filesystem-safe alphabet.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
