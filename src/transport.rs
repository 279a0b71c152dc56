use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod http;

pub use http::ReqwestTransport;

/// A single PUT request. Only headers with a defined value are present.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub url: String,
    pub body: Bytes,
    pub headers: Vec<(&'static str, String)>,
}

impl PutRequest {
    pub fn new(url: impl Into<String>, body: Bytes) -> Self {
        Self {
            url: url.into(),
            body,
            headers: Vec::new(),
        }
    }

    /// Attach a header if it has a value, never sending an empty key.
    pub fn header(mut self, name: &'static str, value: Option<impl Into<String>>) -> Self {
        if let Some(value) = value {
            self.headers.push((name, value.into()));
        }
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Value of the `ETag` response header.
    pub etag: Option<String>,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),
}

/// The raw HTTP primitive every transfer goes through.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn put(&self, request: PutRequest) -> Result<TransportResponse, TransportError>;
}
