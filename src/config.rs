use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UploadError};

/// Chunk size used when re-buffering a streamed file: 2 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

pub const DEFAULT_CONCURRENCY: usize = 4;

pub const DEFAULT_RETRIES: u32 = 3;

/// Per-chunk timeout for multipart transfers.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Per-file timeout for buffered transfers, slightly under 90 seconds.
pub const DEFAULT_BUFFERED_TIMEOUT: Duration = Duration::from_millis(89_000);

pub const DEFAULT_ALLOW_ORIGIN: &str = "*";

/// Byte-stream compression applied before upload. The identifier is also the
/// `content-encoding` value sent alongside compressed payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionFormat {
    Gzip,
    /// zlib-wrapped deflate.
    Deflate,
    DeflateRaw,
}

impl CompressionFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionFormat::Gzip => "gzip",
            CompressionFormat::Deflate => "deflate",
            CompressionFormat::DeflateRaw => "deflate-raw",
        }
    }

    /// Parse a CLI/env value where `none` explicitly disables compression.
    pub fn parse_setting(value: &str) -> Result<Option<Self>> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "off" | "" => Ok(None),
            other => other.parse().map(Some),
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionFormat {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gzip" => Ok(CompressionFormat::Gzip),
            "deflate" => Ok(CompressionFormat::Deflate),
            "deflate-raw" => Ok(CompressionFormat::DeflateRaw),
            other => Err(UploadError::precondition(format!(
                "unsupported compression format: {other}"
            ))),
        }
    }
}

pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Caller-supplied callbacks fired by the retry loop.
#[derive(Clone, Default)]
pub struct RetryHooks {
    /// Fired once before every retry attempt.
    pub on_before_retry: Option<Hook>,
    /// Fired before a retry whose failed attempt timed out.
    pub on_timeout: Option<Hook>,
}

impl RetryHooks {
    pub fn before_retry(&self) {
        if let Some(hook) = &self.on_before_retry {
            hook();
        }
    }

    pub fn timed_out(&self) {
        if let Some(hook) = &self.on_timeout {
            hook();
        }
    }
}

impl fmt::Debug for RetryHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryHooks")
            .field("on_before_retry", &self.on_before_retry.is_some())
            .field("on_timeout", &self.on_timeout.is_some())
            .finish()
    }
}

/// Options for a long-lived [`Uploader`](crate::upload::Uploader).
#[derive(Debug, Clone)]
pub struct UploaderOptions {
    pub chunk_size: usize,
    pub concurrency: usize,
    pub retries: u32,
    /// Per-chunk timeout on the multipart path.
    pub timeout: Option<Duration>,
    /// Per-file timeout on the buffered paths.
    pub buffered_timeout: Option<Duration>,
    /// `None` disables compression.
    pub compression: Option<CompressionFormat>,
    pub access_control_allow_origin: String,
    pub hooks: RetryHooks,
}

impl Default for UploaderOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            retries: DEFAULT_RETRIES,
            timeout: Some(DEFAULT_CHUNK_TIMEOUT),
            buffered_timeout: Some(DEFAULT_BUFFERED_TIMEOUT),
            compression: Some(CompressionFormat::Gzip),
            access_control_allow_origin: DEFAULT_ALLOW_ORIGIN.to_string(),
            hooks: RetryHooks::default(),
        }
    }
}

impl UploaderOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_buffered_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.buffered_timeout = timeout;
        self
    }

    pub fn with_compression(mut self, compression: Option<CompressionFormat>) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.access_control_allow_origin = origin.into();
        self
    }

    pub fn with_hooks(mut self, hooks: RetryHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(UploadError::precondition("chunk size must be greater than zero"));
        }
        if self.concurrency == 0 {
            return Err(UploadError::precondition("concurrency must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let options = UploaderOptions::default();
        assert_eq!(options.chunk_size, 2 * 1024 * 1024);
        assert_eq!(options.concurrency, 4);
        assert_eq!(options.retries, 3);
        assert_eq!(options.timeout, Some(Duration::from_millis(5000)));
        assert_eq!(options.buffered_timeout, Some(Duration::from_millis(89000)));
        assert_eq!(options.compression, Some(CompressionFormat::Gzip));
        assert_eq!(options.access_control_allow_origin, "*");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn compression_setting_parsing() {
        assert_eq!(CompressionFormat::parse_setting("none").unwrap(), None);
        assert_eq!(
            CompressionFormat::parse_setting("GZIP").unwrap(),
            Some(CompressionFormat::Gzip)
        );
        assert_eq!(
            CompressionFormat::parse_setting("deflate-raw").unwrap(),
            Some(CompressionFormat::DeflateRaw)
        );
        assert!(CompressionFormat::parse_setting("brotli").is_err());
        assert_eq!(CompressionFormat::Deflate.to_string(), "deflate");
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = UploaderOptions::default().with_chunk_size(0).validate().unwrap_err();
        assert!(err.is_precondition());

        let err = UploaderOptions::default().with_concurrency(0).validate().unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn hooks_fire_when_set() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let hooks = RetryHooks {
            on_before_retry: Some(Arc::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })),
            on_timeout: None,
        };

        hooks.before_retry();
        hooks.timed_out();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
