//! Pre-issued URL sets for the upload paths.

use std::time::Duration;

use async_trait::async_trait;

use crate::chunk::DEFAULT_CONTENT_TYPE;
use crate::config::CompressionFormat;
use crate::error::{Result, UploadError};
use crate::upload::multipart::required_parts;
use crate::upload::UploadUrls;

pub mod s3;

pub use s3::ObjectStoreUrlProvider;

/// Largest number of parts the storage service accepts for one object.
pub const MAX_PARTS: u64 = 10_000;

pub const DEFAULT_URL_EXPIRY: Duration = Duration::from_secs(100);

pub const DEFAULT_PROVIDER_CHUNK_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignRequest {
    pub bucket: String,
    pub key: String,
    pub folder: Option<String>,
    pub content_type: String,
    pub content_encoding: Option<CompressionFormat>,
    pub expires_in: Duration,
    pub file_size: u64,
    pub chunk_size: usize,
    pub multipart: bool,
}

impl PresignRequest {
    pub fn single(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            folder: None,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            content_encoding: None,
            expires_in: DEFAULT_URL_EXPIRY,
            file_size: 0,
            chunk_size: DEFAULT_PROVIDER_CHUNK_SIZE,
            multipart: false,
        }
    }

    pub fn multipart(bucket: impl Into<String>, key: impl Into<String>, file_size: u64) -> Self {
        Self {
            file_size,
            multipart: true,
            ..Self::single(bucket, key)
        }
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_content_encoding(mut self, encoding: Option<CompressionFormat>) -> Self {
        self.content_encoding = encoding;
        self
    }

    pub fn with_expiry(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// `folder/key`, or just `key` without a folder.
    pub fn object_key(&self) -> String {
        match self.folder.as_deref().map(|f| f.trim_matches('/')) {
            Some(folder) if !folder.is_empty() => format!("{folder}/{}", self.key),
            _ => self.key.clone(),
        }
    }

    /// URLs to issue. Multipart requests get one extra part as compression
    /// slack.
    pub fn url_count(&self) -> Result<u64> {
        if !self.multipart {
            return Ok(1);
        }
        if self.chunk_size == 0 {
            return Err(UploadError::precondition("chunk size must be positive"));
        }
        let count = required_parts(self.file_size, self.chunk_size) + 1;
        if count > MAX_PARTS {
            return Err(UploadError::precondition(format!(
                "{count} parts exceed the limit of {MAX_PARTS}"
            )));
        }
        Ok(count)
    }
}

/// Source of pre-issued PUT URLs.
#[async_trait]
pub trait UrlProvider: Send + Sync {
    async fn presign(&self, request: &PresignRequest) -> Result<UploadUrls>;
}
