//! Shared test doubles: a scripted [`Transport`] mock and polling helpers.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uplift_protocol::{
    InitiateUploadRequest, InitiateUploadResponse, UploadStatus, UploadStatusResponse,
};
use uplift_store::{BlobStore, MetaStore};
use uplift_transport::{Transport, TransportError};

use crate::engine::UploadEngine;

/// Scripted transport double. Calls are recorded in order; responses are
/// configured per operation, defaulting to success.
pub(crate) struct MockTransport {
    calls: Mutex<Vec<String>>,
    chunk_payloads: Mutex<Vec<Vec<u8>>>,
    initiate_result: Mutex<Option<Result<InitiateUploadResponse, u16>>>,
    status_script: Mutex<VecDeque<UploadStatusResponse>>,
    last_status: Mutex<Option<UploadStatusResponse>>,
    chunk_failures: Mutex<HashMap<u32, u16>>,
    chunk_delay: Mutex<Duration>,
    complete_failure: Mutex<Option<u16>>,
    status_failure: Mutex<Option<u16>>,
    pause_failure: Mutex<Option<u16>>,
    resume_failure: Mutex<Option<u16>>,
    cancel_failure: Mutex<Option<u16>>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            chunk_payloads: Mutex::new(Vec::new()),
            initiate_result: Mutex::new(None),
            status_script: Mutex::new(VecDeque::new()),
            last_status: Mutex::new(None),
            chunk_failures: Mutex::new(HashMap::new()),
            chunk_delay: Mutex::new(Duration::ZERO),
            complete_failure: Mutex::new(None),
            status_failure: Mutex::new(None),
            pause_failure: Mutex::new(None),
            resume_failure: Mutex::new(None),
            cancel_failure: Mutex::new(None),
        })
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn chunk_payloads(&self) -> Vec<Vec<u8>> {
        self.chunk_payloads.lock().unwrap().clone()
    }

    pub(crate) fn set_initiate(&self, result: Result<InitiateUploadResponse, u16>) {
        *self.initiate_result.lock().unwrap() = Some(result);
    }

    /// Queues one status response. Once consumed it stays sticky: further
    /// status calls repeat it, the way a real server keeps reporting its
    /// state. With nothing queued the mock answers `uploading`, no chunks.
    pub(crate) fn push_status(&self, resp: UploadStatusResponse) {
        self.status_script.lock().unwrap().push_back(resp);
    }

    pub(crate) fn fail_chunk(&self, index: u32, status: u16) {
        self.chunk_failures.lock().unwrap().insert(index, status);
    }

    pub(crate) fn set_chunk_delay(&self, delay: Duration) {
        *self.chunk_delay.lock().unwrap() = delay;
    }

    pub(crate) fn fail_complete(&self, status: u16) {
        *self.complete_failure.lock().unwrap() = Some(status);
    }

    pub(crate) fn fail_status(&self, status: u16) {
        *self.status_failure.lock().unwrap() = Some(status);
    }

    pub(crate) fn fail_pause(&self, status: u16) {
        *self.pause_failure.lock().unwrap() = Some(status);
    }

    pub(crate) fn fail_resume(&self, status: u16) {
        *self.resume_failure.lock().unwrap() = Some(status);
    }

    pub(crate) fn fail_cancel(&self, status: u16) {
        *self.cancel_failure.lock().unwrap() = Some(status);
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

fn status_err(status: u16) -> TransportError {
    TransportError::Status {
        status,
        body: String::new(),
    }
}

fn outcome(failure: Option<u16>) -> Result<(), TransportError> {
    match failure {
        Some(status) => Err(status_err(status)),
        None => Ok(()),
    }
}

impl Transport for MockTransport {
    fn initiate(
        &self,
        _req: InitiateUploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<InitiateUploadResponse, TransportError>> + Send + '_>>
    {
        self.record("initiate");
        let result = self.initiate_result.lock().unwrap().take();
        Box::pin(async move {
            match result {
                Some(Ok(resp)) => Ok(resp),
                Some(Err(status)) => Err(status_err(status)),
                None => Ok(InitiateUploadResponse {
                    upload_id: "srv-1".into(),
                    s3_key: None,
                    chunk_size: None,
                    total_chunks: None,
                }),
            }
        })
    }

    fn upload_chunk(
        &self,
        _id: &str,
        chunk_index: u32,
        _total_chunks: u32,
        data: Vec<u8>,
        _filename: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        self.record(format!("chunk:{chunk_index}"));
        let delay = *self.chunk_delay.lock().unwrap();
        let failure = self
            .chunk_failures
            .lock()
            .unwrap()
            .get(&chunk_index)
            .copied();
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(status) = failure {
                return Err(status_err(status));
            }
            self.chunk_payloads.lock().unwrap().push(data);
            Ok(())
        })
    }

    fn complete(
        &self,
        _id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        self.record("complete");
        let failure = *self.complete_failure.lock().unwrap();
        Box::pin(async move { outcome(failure) })
    }

    fn pause(
        &self,
        _id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        self.record("pause");
        let failure = *self.pause_failure.lock().unwrap();
        Box::pin(async move { outcome(failure) })
    }

    fn resume(
        &self,
        _id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        self.record("resume");
        let failure = *self.resume_failure.lock().unwrap();
        Box::pin(async move { outcome(failure) })
    }

    fn status(
        &self,
        _id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<UploadStatusResponse, TransportError>> + Send + '_>>
    {
        self.record("status");
        let failure = *self.status_failure.lock().unwrap();
        let response = {
            let mut last = self.last_status.lock().unwrap();
            if let Some(next) = self.status_script.lock().unwrap().pop_front() {
                *last = Some(next);
            }
            last.clone().unwrap_or(UploadStatusResponse {
                status: "uploading".into(),
                uploaded_chunks: Vec::new(),
            })
        };
        Box::pin(async move {
            if let Some(status) = failure {
                return Err(status_err(status));
            }
            Ok(response)
        })
    }

    fn cancel(
        &self,
        _id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        self.record("cancel");
        let failure = *self.cancel_failure.lock().unwrap();
        Box::pin(async move { outcome(failure) })
    }
}

/// Builds an engine over an in-memory meta store, a tempdir blob store and
/// a fresh mock transport, with a 4-byte chunk size.
pub(crate) async fn harness() -> (Arc<UploadEngine>, Arc<MockTransport>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let meta = Arc::new(MetaStore::in_memory());
    let blobs = Arc::new(BlobStore::new(tmp.path()));
    let mock = MockTransport::new();
    let transport: Arc<dyn Transport> = mock.clone();
    let engine = Arc::new(UploadEngine::new(meta, blobs, transport, 4));
    (engine, mock, tmp)
}

/// Polls until the record reaches `status` or the test times out.
pub(crate) async fn wait_for_status(meta: &MetaStore, id: &str, status: UploadStatus) {
    for _ in 0..400 {
        if meta.get_upload(id).map(|r| r.status) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "timed out waiting for {status}, record: {:?}",
        meta.get_upload(id)
    );
}

/// Polls an arbitrary condition.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for condition");
}
