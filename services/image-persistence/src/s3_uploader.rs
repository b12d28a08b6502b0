use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// The request reached the store, which rejected it
    #[error("Storage service rejected the upload: {0}")]
    Service(String),

    /// The store could not be reached or its response could not be read
    #[error("Storage client error: {0}")]
    Client(String),

    #[error("Upload timed out after {0:?}")]
    Timeout(Duration),
}

/// Metadata sent with an uploaded object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_type: String,
    /// Stored as the `title` user metadata entry
    pub title: String,
    pub content_length: u64,
}

/// Single-object upload request
#[derive(Debug, Clone)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub metadata: ObjectMetadata,
}

/// Object storage boundary used by the pipeline
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, request: PutObjectRequest) -> Result<(), StorageError>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Create a new S3 object store; credentials come from the default provider chain
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, request), fields(bucket = %request.bucket, key = %request.key))]
    async fn put_object(&self, request: PutObjectRequest) -> Result<(), StorageError> {
        debug!(size_bytes = request.body.len(), "Uploading image to S3");

        let content_length = i64::try_from(request.metadata.content_length)
            .map_err(|_| StorageError::Client("content length out of range".to_string()))?;

        self.client
            .put_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .body(ByteStream::from(request.body))
            .content_type(&request.metadata.content_type)
            .content_length(content_length)
            .metadata("title", &request.metadata.title)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some() {
                    StorageError::Service(DisplayErrorContext(&e).to_string())
                } else {
                    StorageError::Client(DisplayErrorContext(&e).to_string())
                }
            })?;

        Ok(())
    }
}
