use std::sync::Arc;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::signer::Signer;
use reqwest::Method;
use tracing::{info, instrument};

use crate::error::{Result, UploadError};
use crate::provider::{PresignRequest, UrlProvider};
use crate::upload::UploadUrls;

/// Signs single-object PUT URLs for one bucket.
#[derive(Debug, Clone)]
pub struct ObjectStoreUrlProvider {
    signer: Arc<dyn Signer>,
    bucket: String,
}

impl ObjectStoreUrlProvider {
    pub fn new(signer: Arc<dyn Signer>, bucket: impl Into<String>) -> Self {
        Self {
            signer,
            bucket: bucket.into(),
        }
    }

    /// Credentials and region come from the usual `AWS_*` variables.
    pub fn from_env(bucket: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(&bucket)
            .build()
            .map_err(|e| UploadError::Provider(e.to_string()))?;

        Ok(Self::new(Arc::new(store), bucket))
    }
}

#[async_trait]
impl UrlProvider for ObjectStoreUrlProvider {
    #[instrument(skip_all, fields(bucket = %request.bucket, key = %request.key))]
    async fn presign(&self, request: &PresignRequest) -> Result<UploadUrls> {
        if request.multipart {
            return Err(UploadError::Provider(
                "multipart presigning needs an upload id from the backend".into(),
            ));
        }
        if request.bucket != self.bucket {
            return Err(UploadError::Provider(format!(
                "provider is bound to bucket {}, not {}",
                self.bucket, request.bucket
            )));
        }

        let path = Path::from(request.object_key());
        let url = self
            .signer
            .signed_url(Method::PUT, &path, request.expires_in)
            .await
            .map_err(|e| UploadError::Provider(e.to_string()))?;

        info!(path = %path, "signed upload url");
        Ok(UploadUrls::single(url.to_string()))
    }
}
