use thiserror::Error;

use crate::transport::TransportError;

pub const BAD_REQUEST: u16 = 400;
pub const REQUEST_TIMEOUT: u16 = 408;
pub const INTERNAL_ERROR: u16 = 500;

/// Errors surfaced to callers of the upload API.
///
/// Transient transfer failures never show up here: the transfer primitives
/// retry them and report exhaustion as `None`, which the multipart flow turns
/// into an abort rather than an error.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The call was rejected before any network activity started.
    #[error("{message}")]
    Precondition { message: String, code: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend call failed: {0}")]
    Transport(#[from] TransportError),

    #[error("url provider failed: {0}")]
    Provider(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UploadError {
    pub fn precondition(message: impl Into<String>) -> Self {
        UploadError::Precondition {
            message: message.into(),
            code: BAD_REQUEST,
        }
    }

    /// HTTP-style status code describing the failure.
    pub fn code(&self) -> u16 {
        match self {
            UploadError::Precondition { code, .. } => *code,
            UploadError::Transport(TransportError::Timeout) => REQUEST_TIMEOUT,
            _ => INTERNAL_ERROR,
        }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, UploadError::Precondition { .. })
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;
