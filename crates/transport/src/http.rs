//! reqwest implementation of the upload wire contract.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{CACHE_CONTROL, HeaderMap, HeaderValue, PRAGMA};
use reqwest::multipart::{Form, Part};
use tracing::trace;

use uplift_protocol::{InitiateUploadRequest, InitiateUploadResponse, UploadStatusResponse};

use crate::retry::{RetryConfig, with_retry};
use crate::{Transport, TransportError};

/// Default backend endpoint; override via configuration.
pub const DEFAULT_BASE_URL: &str = "http://localhost:4000/api/uploads";

/// Deadline for all calls except chunk POSTs.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for chunk POSTs, which carry megabytes of payload.
pub const CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for the upload server.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpTransport {
    /// Creates a transport against `base_url` with the default retry policy.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_retry_config(base_url, RetryConfig::default())
    }

    pub fn with_retry_config(
        base_url: impl Into<String>,
        retry: RetryConfig,
    ) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            retry,
        })
    }

    async fn initiate_inner(
        &self,
        req: &InitiateUploadRequest,
    ) -> Result<InitiateUploadResponse, TransportError> {
        with_retry(&self.retry, || async {
            let resp = self
                .http
                .post(format!("{}/initiate", self.base_url))
                .json(req)
                .send()
                .await?;
            let body = expect_success(resp).await?;
            Ok(serde_json::from_str(&body)?)
        })
        .await
    }

    async fn upload_chunk_inner(
        &self,
        id: &str,
        chunk_index: u32,
        total_chunks: u32,
        data: &[u8],
        filename: &str,
    ) -> Result<(), TransportError> {
        with_retry(&self.retry, || async {
            let part = Part::bytes(data.to_vec())
                .file_name(filename.to_string())
                .mime_str("application/octet-stream")?;
            let form = Form::new()
                .part("chunk", part)
                .text("chunkIndex", chunk_index.to_string())
                .text("totalChunks", total_chunks.to_string());

            let resp = self
                .http
                .post(format!("{}/{id}/chunk", self.base_url))
                .multipart(form)
                .timeout(CHUNK_TIMEOUT)
                .send()
                .await?;
            expect_success(resp).await?;
            trace!(upload_id = %id, chunk_index, "chunk acknowledged");
            Ok(())
        })
        .await
    }

    async fn post_empty(&self, path: String) -> Result<(), TransportError> {
        with_retry(&self.retry, || async {
            let resp = self.http.post(&path).send().await?;
            expect_success(resp).await?;
            Ok(())
        })
        .await
    }

    async fn status_inner(&self, id: &str) -> Result<UploadStatusResponse, TransportError> {
        with_retry(&self.retry, || async {
            let resp = self
                .http
                .get(format!("{}/{id}/status", self.base_url))
                .send()
                .await?;
            let body = expect_success(resp).await?;
            Ok(serde_json::from_str(&body)?)
        })
        .await
    }

    async fn cancel_inner(&self, id: &str) -> Result<(), TransportError> {
        with_retry(&self.retry, || async {
            let resp = self
                .http
                .delete(format!("{}/{id}", self.base_url))
                .send()
                .await?;
            expect_success(resp).await?;
            Ok(())
        })
        .await
    }
}

impl Transport for HttpTransport {
    fn initiate(
        &self,
        req: InitiateUploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<InitiateUploadResponse, TransportError>> + Send + '_>>
    {
        Box::pin(async move { self.initiate_inner(&req).await })
    }

    fn upload_chunk(
        &self,
        id: &str,
        chunk_index: u32,
        total_chunks: u32,
        data: Vec<u8>,
        filename: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        let id = id.to_string();
        let filename = filename.to_string();
        Box::pin(async move {
            self.upload_chunk_inner(&id, chunk_index, total_chunks, &data, &filename)
                .await
        })
    }

    fn complete(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        let path = format!("{}/{id}/complete", self.base_url);
        Box::pin(self.post_empty(path))
    }

    fn pause(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        let path = format!("{}/{id}/pause", self.base_url);
        Box::pin(self.post_empty(path))
    }

    fn resume(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        let path = format!("{}/{id}/resume", self.base_url);
        Box::pin(self.post_empty(path))
    }

    fn status(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<UploadStatusResponse, TransportError>> + Send + '_>>
    {
        let id = id.to_string();
        Box::pin(async move { self.status_inner(&id).await })
    }

    fn cancel(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(async move { self.cancel_inner(&id).await })
    }
}

/// Maps non-2xx responses to [`TransportError::Status`], returning the body
/// text otherwise.
async fn expect_success(resp: reqwest::Response) -> Result<String, TransportError> {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if status.is_success() {
        Ok(body)
    } else {
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
