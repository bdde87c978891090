//! Stepwise schema migration for the persisted metadata projection.
//!
//! The persisted shape is `{ "version": N, "uploads": { id: record } }`.
//! Each step is a total function from the previous shape to the next;
//! unknown versions pass through untouched and are repaired on load where
//! the invariants still allow it.

use serde_json::{Map, Value, json};

/// Current persisted schema version.
pub const SCHEMA_VERSION: u32 = 5;

/// Migrates a raw persisted state from `from_version` up to
/// [`SCHEMA_VERSION`].
pub fn migrate(mut state: Value, from_version: u32) -> Value {
    let mut version = from_version;
    while version < SCHEMA_VERSION {
        state = match version {
            1 => strip_record_key(state, "file"),
            2 => strip_transient_guards(state),
            3 => inject_needs_file(state),
            4 => ensure_derived_fields(state),
            _ => state,
        };
        version += 1;
    }
    if from_version <= SCHEMA_VERSION
        && let Value::Object(map) = &mut state
    {
        map.insert("version".into(), json!(SCHEMA_VERSION));
    }
    state
}

/// v1 → v2: older versions serialized the raw file handle into the record.
fn strip_record_key(state: Value, key: &str) -> Value {
    map_records(state, |record| {
        record.remove(key);
    })
}

/// v2 → v3: per-record UI guard flags used to leak into the projection.
fn strip_transient_guards(state: Value) -> Value {
    map_records(state, |record| {
        record.remove("isResuming");
        record.remove("isUploading");
        record.remove("dragOver");
    })
}

/// v3 → v4: `needsFile` did not exist before v4.
fn inject_needs_file(state: Value) -> Value {
    map_records(state, |record| {
        record
            .entry("needsFile")
            .or_insert(Value::Bool(false));
    })
}

/// v4 → v5: derived byte/progress fields became mandatory.
fn ensure_derived_fields(state: Value) -> Value {
    map_records(state, |record| {
        let filesize = record.get("filesize").and_then(Value::as_u64).unwrap_or(0);
        let chunk_size = record
            .get("chunkSize")
            .and_then(Value::as_u64)
            .unwrap_or(uplift_protocol::DEFAULT_CHUNK_SIZE);
        let chunks: Vec<u32> = record
            .get("uploadedChunks")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_u64)
                    .map(|v| v as u32)
                    .collect()
            })
            .unwrap_or_default();

        let bytes = uplift_protocol::uploaded_bytes(&chunks, chunk_size, filesize);
        record
            .entry("uploadedBytes")
            .or_insert(json!(bytes));
        record
            .entry("progress")
            .or_insert(json!(uplift_protocol::progress_percent(bytes, filesize)));
    })
}

fn map_records(mut state: Value, f: impl Fn(&mut Map<String, Value>)) -> Value {
    if let Some(uploads) = state.get_mut("uploads").and_then(Value::as_object_mut) {
        for record in uploads.values_mut() {
            if let Some(map) = record.as_object_mut() {
                f(map);
            }
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1_state() -> Value {
        json!({
            "version": 1,
            "uploads": {
                "u1": {
                    "uploadId": "u1",
                    "filename": "a.bin",
                    "filetype": "application/octet-stream",
                    "filesize": 10,
                    "chunkSize": 4,
                    "totalChunks": 3,
                    "uploadedChunks": [0, 1],
                    "status": "PAUSED",
                    "createdAt": "2026-07-01T12:00:00Z",
                    "file": {"legacy": "handle"},
                    "isResuming": true
                }
            }
        })
    }

    #[test]
    fn migrates_v1_all_the_way() {
        let out = migrate(v1_state(), 1);
        assert_eq!(out["version"], 5);

        let rec = &out["uploads"]["u1"];
        assert!(rec.get("file").is_none());
        assert!(rec.get("isResuming").is_none());
        assert_eq!(rec["needsFile"], false);
        // Chunks 0 and 1 of a 10-byte file at 4-byte chunks: 4 + 4.
        assert_eq!(rec["uploadedBytes"], 8);
        assert_eq!(rec["progress"], 80.0);
    }

    #[test]
    fn v3_injects_needs_file_without_clobbering() {
        let state = json!({
            "uploads": {
                "u1": {"needsFile": true},
                "u2": {}
            }
        });
        let out = migrate(state, 3);
        assert_eq!(out["uploads"]["u1"]["needsFile"], true);
        assert_eq!(out["uploads"]["u2"]["needsFile"], false);
    }

    #[test]
    fn current_version_is_untouched_except_stamp() {
        let state = json!({
            "version": 5,
            "uploads": {
                "u1": {"uploadId": "u1", "uploadedBytes": 7, "progress": 70.0}
            }
        });
        let out = migrate(state.clone(), 5);
        assert_eq!(out, state);
    }

    #[test]
    fn future_version_passes_through() {
        let state = json!({"version": 9, "uploads": {}});
        let out = migrate(state, 9);
        assert_eq!(out["version"], 9);
        assert_eq!(out["uploads"], json!({}));
    }

    #[test]
    fn empty_state_migrates_cleanly() {
        let out = migrate(json!({}), 1);
        assert_eq!(out["version"], 5);
    }
}
