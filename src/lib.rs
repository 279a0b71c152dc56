pub mod chunk;
pub mod config;
pub mod error;
pub mod gate;
pub mod progress;
pub mod provider;
pub mod transfer;
pub mod transport;
pub mod upload;

pub use chunk::UploadSource;
pub use config::{CompressionFormat, RetryHooks, UploaderOptions};
pub use error::{Result, UploadError};
pub use progress::{ProgressCallback, ProgressEvent};
pub use provider::{ObjectStoreUrlProvider, PresignRequest, UrlProvider};
pub use transport::{PutRequest, Transport, TransportError, TransportResponse};
pub use upload::{
    AbortedUpload, BatchItem, BatchOptions, BatchOutcome, CompletionToken, FailureReason,
    MultipartResult, UploadSession, UploadUrls, Uploader,
};
