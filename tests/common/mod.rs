#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use chunkput::{
    PutRequest, Transport, TransportError, TransportResponse, UploadSession, UploadUrls,
};

pub const COMPLETE_URL: &str = "http://backend.test/complete";
pub const ABORT_URL: &str = "http://backend.test/abort";

/// In-memory transport that records every request and answers per URL.
///
/// Part URLs answer 200 with an `ETag` derived from the URL; URLs matching a
/// failure rule answer 500, URLs with queued timeouts report a transport
/// timeout that many times first.
#[derive(Default)]
pub struct MockTransport {
    requests: Mutex<Vec<PutRequest>>,
    failing: Mutex<Vec<String>>,
    timeouts: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every request for `delay` so overlapping transfers are observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_urls_containing(self, pattern: &str) -> Self {
        self.failing.lock().unwrap().push(pattern.to_string());
        self
    }

    pub fn time_out_first(self, pattern: &str, times: usize) -> Self {
        self.timeouts.lock().unwrap().insert(pattern.to_string(), times);
        self
    }

    pub fn requests(&self) -> Vec<PutRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<PutRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url == url)
            .collect()
    }

    pub fn part_requests(&self) -> Vec<PutRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.contains("/part-"))
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn scripted_timeout(&self, url: &str) -> bool {
        let mut timeouts = self.timeouts.lock().unwrap();
        for (pattern, left) in timeouts.iter_mut() {
            if url.contains(pattern.as_str()) && *left > 0 {
                *left -= 1;
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn put(&self, request: PutRequest) -> Result<TransportResponse, TransportError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);

        if self.scripted_timeout(&url) {
            return Err(TransportError::Timeout);
        }
        if self
            .failing
            .lock()
            .unwrap()
            .iter()
            .any(|pattern| url.contains(pattern.as_str()))
        {
            return Ok(TransportResponse {
                status: 500,
                etag: None,
                body: Bytes::new(),
            });
        }

        let tag = url.rsplit('/').next().unwrap_or_default();
        Ok(TransportResponse {
            status: 200,
            etag: Some(format!("\"etag-{tag}\"")),
            body: Bytes::from(format!(r#"{{"ok":true,"url":"{url}"}}"#)),
        })
    }
}

pub fn part_urls(count: usize) -> UploadUrls {
    UploadUrls {
        urls: (1..=count)
            .map(|i| format!("http://storage.test/bucket/part-{i}"))
            .collect(),
        upload_id: Some("upload-42".into()),
    }
}

pub fn session() -> UploadSession {
    UploadSession {
        upload_id: "upload-42".into(),
        completion_url: COMPLETE_URL.into(),
        abort_url: ABORT_URL.into(),
        file_path: "videos/clip.bin".into(),
    }
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn body_json(request: &PutRequest) -> serde_json::Value {
    serde_json::from_slice(&request.body).unwrap()
}

pub fn shared(transport: MockTransport) -> Arc<MockTransport> {
    Arc::new(transport)
}
