use async_trait::async_trait;
use reqwest::header::ETAG;
use reqwest::Client;
use tracing::{debug, instrument};

use crate::error::{Result, UploadError};
use crate::transport::{PutRequest, Transport, TransportError, TransportResponse};

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| UploadError::Provider(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(value.to_string())
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip_all, fields(url = %request.url, len = request.body.len()))]
    async fn put(&self, request: PutRequest) -> std::result::Result<TransportResponse, TransportError> {
        let mut builder = self.client.put(&request.url).body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await?;

        debug!(status, etag = etag.as_deref().unwrap_or(""), "PUT complete");
        Ok(TransportResponse { status, etag, body })
    }
}
