use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::chunk::{compress_bytes, UploadSource};
use crate::config::UploaderOptions;
use crate::error::{Result, UploadError};
use crate::progress::{Progress, ProgressCallback};
use crate::provider::{PresignRequest, UrlProvider};
use crate::transfer::{upload_buffer, TransferOptions};
use crate::transport::{ReqwestTransport, Transport, TransportResponse};

pub mod batch;
pub mod commit;
pub mod multipart;

pub use batch::{BatchItem, BatchOptions, BatchOutcome};

/// One pre-issued destination URL and the part it accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub url: String,
    pub part_no: u32,
}

/// Proof of receipt for one uploaded part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionToken {
    #[serde(rename = "e_tag")]
    pub etag: String,
    pub part_no: u32,
}

/// What a URL provider hands out: ordered PUT URLs (index = part number - 1)
/// and, for multipart uploads, the upload id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadUrls {
    pub urls: Vec<String>,
    #[serde(default)]
    pub upload_id: Option<String>,
}

impl UploadUrls {
    pub fn single(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            upload_id: None,
        }
    }

    pub fn target(&self, part_no: u32) -> Option<UploadTarget> {
        let index = (part_no as usize).checked_sub(1)?;
        self.urls.get(index).map(|url| UploadTarget {
            url: url.clone(),
            part_no,
        })
    }
}

/// Backend coordinates of one multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub upload_id: String,
    pub completion_url: String,
    pub abort_url: String,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// A chunk exhausted its retries.
    ChunkFailed { part_no: u32 },
    /// The stream produced more chunks than there are URLs.
    MissingUrl { part_no: u32 },
    /// Reading or compressing the source failed mid-stream.
    Source(String),
    /// A transfer task died without settling.
    TaskLost(String),
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ChunkFailed { part_no } => write!(f, "part {part_no} failed to upload"),
            FailureReason::MissingUrl { part_no } => write!(f, "no upload url for part {part_no}"),
            FailureReason::Source(e) => write!(f, "source read failed: {e}"),
            FailureReason::TaskLost(e) => write!(f, "transfer task lost: {e}"),
            FailureReason::Cancelled => f.write_str("upload cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbortedUpload {
    pub reason: FailureReason,
    /// Whatever the abort endpoint returned, when it answered at all.
    pub response: Option<TransportResponse>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MultipartResult {
    Completed(TransportResponse),
    Aborted(AbortedUpload),
}

impl MultipartResult {
    pub fn is_aborted(&self) -> bool {
        matches!(self, MultipartResult::Aborted(_))
    }

    pub fn response(&self) -> Option<&TransportResponse> {
        match self {
            MultipartResult::Completed(response) => Some(response),
            MultipartResult::Aborted(aborted) => aborted.response.as_ref(),
        }
    }
}

/// Long-lived upload engine. Holds no per-file state; every call builds its
/// own concurrency gate.
#[derive(Clone)]
pub struct Uploader {
    transport: Arc<dyn Transport>,
    options: UploaderOptions,
}

impl Uploader {
    pub fn new(options: UploaderOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::with_transport(Arc::new(ReqwestTransport::new()?), options))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, options: UploaderOptions) -> Self {
        Self { transport, options }
    }

    pub fn options(&self) -> &UploaderOptions {
        &self.options
    }

    /// Stream `source` through the pre-issued `urls`, then complete or abort
    /// the session with the backend.
    #[instrument(skip_all, fields(file = %source.name, size = source.size, upload_id = %session.upload_id))]
    pub async fn multipart_upload(
        &self,
        source: UploadSource,
        urls: &UploadUrls,
        session: &UploadSession,
        on_progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<MultipartResult> {
        self.options.validate()?;
        multipart::check_urls(urls, source.size, self.options.chunk_size)?;

        info!(parts = urls.urls.len(), "starting multipart upload");
        let mut progress = Progress::new(on_progress, source.size);
        let outcome = multipart::run(
            Arc::clone(&self.transport),
            &self.options,
            urls,
            source,
            &mut progress,
            cancel,
        )
        .await;

        commit::finalize(
            self.transport.as_ref(),
            &self.options.access_control_allow_origin,
            session,
            outcome,
            &progress,
        )
        .await
    }

    /// Upload a whole file, uncompressed, to a single presigned URL.
    #[instrument(skip_all, fields(file = %source.name, size = source.size))]
    pub async fn upload_with_presigned_url(
        &self,
        source: UploadSource,
        url: &str,
    ) -> Result<Option<TransportResponse>> {
        if url.trim().is_empty() {
            return Err(UploadError::precondition("Invalid presigned url."));
        }

        let options = TransferOptions::for_buffer(&self.options, &source.content_type, None);
        let body = source.read_all().await?;
        Ok(upload_buffer(
            self.transport.as_ref(),
            url,
            body,
            &options,
            &CancellationToken::new(),
        )
        .await)
    }

    /// Upload a whole file to a single URL, compressed with the configured
    /// format when there is one.
    #[instrument(skip_all, fields(file = %source.name, size = source.size))]
    pub async fn buffered_file_upload(
        &self,
        source: UploadSource,
        url: &str,
    ) -> Result<Option<TransportResponse>> {
        if url.trim().is_empty() {
            return Err(UploadError::precondition("Invalid presigned url."));
        }

        let compression = self.options.compression;
        let options = TransferOptions::for_buffer(&self.options, &source.content_type, compression);
        let raw = source.read_all().await?;
        let body = match compression {
            Some(format) => compress_bytes(&raw, format)?,
            None => raw,
        };

        Ok(upload_buffer(
            self.transport.as_ref(),
            url,
            body,
            &options,
            &CancellationToken::new(),
        )
        .await)
    }

    /// Upload many small files concurrently, each to its own URL.
    pub async fn buffered_files_upload(
        &self,
        items: Vec<BatchItem>,
        options: BatchOptions,
        on_progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchOutcome>> {
        self.options.validate()?;
        batch::run(
            Arc::clone(&self.transport),
            &self.options,
            items,
            options,
            on_progress,
            cancel,
        )
        .await
    }

    /// Ask `provider` for a single presigned URL and upload `source` to it.
    pub async fn upload_via_provider(
        &self,
        provider: &dyn UrlProvider,
        request: &PresignRequest,
        source: UploadSource,
    ) -> Result<Option<TransportResponse>> {
        let urls = provider.presign(request).await?;
        let url = urls
            .urls
            .first()
            .ok_or_else(|| UploadError::precondition("Invalid presigned url."))?;
        self.upload_with_presigned_url(source, url).await
    }
}
