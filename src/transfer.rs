//! Single-URL PUT primitives with timeout and bounded retry.
//!
//! Neither primitive returns an error: a transfer that exhausts its retries
//! yields `None`, and the caller decides what a permanent failure means.

use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::config::{CompressionFormat, RetryHooks, UploaderOptions, DEFAULT_RETRIES};
use crate::transport::{PutRequest, Transport, TransportError, TransportResponse};
use crate::upload::{CompletionToken, UploadTarget};

#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub content_type: Option<String>,
    pub content_encoding: Option<CompressionFormat>,
    pub access_control_allow_origin: Option<String>,
    pub timeout: Option<Duration>,
    /// Retries after the first attempt; `0` means a single attempt.
    pub retries: u32,
    pub hooks: RetryHooks,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            content_type: None,
            content_encoding: None,
            access_control_allow_origin: None,
            timeout: None,
            retries: DEFAULT_RETRIES,
            hooks: RetryHooks::default(),
        }
    }
}

impl TransferOptions {
    /// Options for one multipart chunk.
    pub fn for_chunks(options: &UploaderOptions) -> Self {
        Self {
            access_control_allow_origin: Some(options.access_control_allow_origin.clone()),
            timeout: options.timeout,
            retries: options.retries,
            hooks: options.hooks.clone(),
            ..Default::default()
        }
    }

    /// Options for a whole buffered file.
    pub fn for_buffer(
        options: &UploaderOptions,
        content_type: &str,
        content_encoding: Option<CompressionFormat>,
    ) -> Self {
        Self {
            content_type: Some(content_type.to_string()),
            content_encoding,
            access_control_allow_origin: Some(options.access_control_allow_origin.clone()),
            timeout: options.buffered_timeout,
            retries: options.retries,
            hooks: options.hooks.clone(),
        }
    }

    fn request(&self, url: &str, body: Bytes) -> PutRequest {
        PutRequest::new(url, body)
            .header("content-type", self.content_type.clone())
            .header("content-encoding", self.content_encoding.map(|c| c.as_str()))
            .header(
                "access-control-allow-origin",
                self.access_control_allow_origin.clone(),
            )
    }
}

#[derive(Debug)]
enum AttemptFailure {
    Timeout,
    Network(String),
    Status(u16),
}

async fn attempt(
    transport: &dyn Transport,
    request: PutRequest,
    timeout: Option<Duration>,
) -> Result<TransportResponse, AttemptFailure> {
    let sent = match timeout {
        Some(limit) => match tokio::time::timeout(limit, transport.put(request)).await {
            Ok(sent) => sent,
            Err(_) => return Err(AttemptFailure::Timeout),
        },
        None => transport.put(request).await,
    };

    match sent {
        Ok(response) if response.is_success() => Ok(response),
        Ok(response) => Err(AttemptFailure::Status(response.status)),
        Err(TransportError::Timeout) => Err(AttemptFailure::Timeout),
        Err(TransportError::Network(message)) => Err(AttemptFailure::Network(message)),
    }
}

/// PUT `body` to `url`, retrying up to `options.retries` times without delay.
///
/// Hooks run between attempts only: the timeout hook when the failed attempt
/// timed out, then the before-retry hook. Cancellation stops immediately.
pub async fn put_with_retry(
    transport: &dyn Transport,
    url: &str,
    body: Bytes,
    options: &TransferOptions,
    cancel: &CancellationToken,
) -> Option<TransportResponse> {
    let attempts = options.retries + 1;

    for attempt_no in 1..=attempts {
        let request = options.request(url, body.clone());
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = attempt(transport, request, options.timeout) => result,
        };

        let failure = match result {
            Ok(response) => return Some(response),
            Err(failure) => failure,
        };

        if attempt_no == attempts {
            error!(url, attempts, ?failure, "transfer failed permanently");
            break;
        }

        warn!(url, attempt = attempt_no, ?failure, "transfer attempt failed, retrying");
        if matches!(failure, AttemptFailure::Timeout) {
            options.hooks.timed_out();
        }
        options.hooks.before_retry();
    }

    None
}

/// Upload one multipart chunk, yielding its completion token.
pub async fn upload_chunk(
    transport: &dyn Transport,
    target: &UploadTarget,
    body: Bytes,
    options: &TransferOptions,
    cancel: &CancellationToken,
) -> Option<CompletionToken> {
    put_with_retry(transport, &target.url, body, options, cancel)
        .await
        .map(|response| CompletionToken {
            etag: response.etag.unwrap_or_default(),
            part_no: target.part_no,
        })
}

/// Upload a whole buffered file, yielding the raw response.
pub async fn upload_buffer(
    transport: &dyn Transport,
    url: &str,
    body: Bytes,
    options: &TransferOptions,
    cancel: &CancellationToken,
) -> Option<TransportResponse> {
    put_with_retry(transport, url, body, options, cancel).await
}
