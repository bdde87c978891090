use serde::{Deserialize, Serialize};

use crate::types::UploadStatus;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Registers a new upload with the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadRequest {
    pub filename: String,
    pub filetype: String,
    pub filesize: u64,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Server acknowledgment of an initiate request.
///
/// The server may override the client's chunk size; `total_chunks` is then
/// recomputed locally from the override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadResponse {
    pub upload_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
}

/// Server view of an upload, returned by `GET /{id}/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    pub status: String,
    #[serde(default)]
    pub uploaded_chunks: Vec<u32>,
}

impl UploadStatusResponse {
    /// The server status mapped onto the client lifecycle, if recognized.
    pub fn remote_status(&self) -> Option<UploadStatus> {
        UploadStatus::from_remote(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiate_request_uses_camel_case() {
        let req = InitiateUploadRequest {
            filename: "movie.mp4".into(),
            filetype: "video/mp4".into(),
            filesize: 123,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["filename"], "movie.mp4");
        assert_eq!(json["filetype"], "video/mp4");
        assert_eq!(json["filesize"], 123);
    }

    #[test]
    fn initiate_response_optional_fields_default() {
        let resp: InitiateUploadResponse =
            serde_json::from_str(r#"{"uploadId":"u1"}"#).unwrap();
        assert_eq!(resp.upload_id, "u1");
        assert!(resp.s3_key.is_none());
        assert!(resp.chunk_size.is_none());
        assert!(resp.total_chunks.is_none());
    }

    #[test]
    fn initiate_response_parses_overrides() {
        let resp: InitiateUploadResponse = serde_json::from_str(
            r#"{"uploadId":"u1","s3Key":"k/u1","chunkSize":1048576,"totalChunks":12}"#,
        )
        .unwrap();
        assert_eq!(resp.s3_key.as_deref(), Some("k/u1"));
        assert_eq!(resp.chunk_size, Some(1_048_576));
        assert_eq!(resp.total_chunks, Some(12));
    }

    #[test]
    fn status_response_parses_chunk_list() {
        let resp: UploadStatusResponse =
            serde_json::from_str(r#"{"status":"uploading","uploadedChunks":[0,1,2]}"#).unwrap();
        assert_eq!(resp.uploaded_chunks, vec![0, 1, 2]);
        assert_eq!(resp.remote_status(), Some(UploadStatus::Uploading));
    }

    #[test]
    fn status_response_missing_chunks_defaults_empty() {
        let resp: UploadStatusResponse =
            serde_json::from_str(r#"{"status":"completed"}"#).unwrap();
        assert!(resp.uploaded_chunks.is_empty());
        assert_eq!(resp.remote_status(), Some(UploadStatus::Completed));
    }
}
