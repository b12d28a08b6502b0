//! Per-message persistence pipeline.
//!
//! `handle` runs classify, resolve, validate, derive key and upload for one
//! inbound payload and always ends in a [`PersistenceOutcome`]. Errors are
//! converted to outcomes here and never reach the listener.

use crate::completion::CompletionSignal;
use crate::config::Config;
use crate::image_validator::{self, JPEG_CONTENT_TYPE, JPEG_EXTENSION};
use crate::key_deriver::derive_key;
use crate::media_resolver::{FetchError, ImageArtifact, MediaResolver, Resolution};
use crate::s3_uploader::{ObjectMetadata, ObjectStore, PutObjectRequest, StorageError};
use crate::status::{classify, Classified};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// A message as delivered by the broker
#[derive(Debug, Clone)]
pub struct InboundPayload {
    pub body: Bytes,
    /// Text control messages carry no image
    pub is_text: bool,
}

impl InboundPayload {
    pub fn binary(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            is_text: false,
        }
    }

    pub fn text(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            is_text: true,
        }
    }
}

/// Why a message could not be persisted
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of handling one inbound payload
#[derive(Debug)]
pub enum PersistenceOutcome {
    /// Image written under this (prefixed) key
    Uploaded(String),
    SkippedNonImage,
    SkippedTextMessage,
    Failed(PipelineError),
}

impl PersistenceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistenceOutcome::Uploaded(_) => "uploaded",
            PersistenceOutcome::SkippedNonImage => "skipped_non_image",
            PersistenceOutcome::SkippedTextMessage => "skipped_text",
            PersistenceOutcome::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for PersistenceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceOutcome::Uploaded(key) => write!(f, "uploaded {}", key),
            PersistenceOutcome::Failed(e) => write!(f, "failed: {}", e),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Read-only settings the pipeline needs from the process configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub bucket: String,
    pub object_key_prefix: String,
    pub default_source: String,
    pub upload_timeout: Duration,
    pub verify_raw_jpeg: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bucket: config.s3.bucket.clone(),
            object_key_prefix: config.s3.object_key_prefix.clone(),
            default_source: config.pipeline.default_source.clone(),
            upload_timeout: config.upload_timeout(),
            verify_raw_jpeg: config.pipeline.verify_raw_jpeg,
        }
    }
}

/// Classifies inbound payloads and persists the images they carry
pub struct ImagePersistencePipeline {
    settings: PipelineSettings,
    resolver: MediaResolver,
    store: Arc<dyn ObjectStore>,
    completion: CompletionSignal,
}

impl ImagePersistencePipeline {
    pub fn new(
        settings: PipelineSettings,
        resolver: MediaResolver,
        store: Arc<dyn ObjectStore>,
        completion: CompletionSignal,
    ) -> Self {
        debug!(
            bucket = %settings.bucket,
            object_key_prefix = %settings.object_key_prefix,
            default_source = %settings.default_source,
            "Image persistence pipeline configured"
        );

        Self {
            settings,
            resolver,
            store,
            completion,
        }
    }

    /// Signal fired after every handled message
    pub fn completion(&self) -> &CompletionSignal {
        &self.completion
    }

    /// Handle one inbound payload
    #[instrument(skip(self, payload), fields(size_bytes = payload.body.len(), is_text = payload.is_text))]
    pub async fn handle(&self, payload: InboundPayload) -> PersistenceOutcome {
        let outcome = self.process(payload).await;
        self.record(&outcome);
        self.completion.fire();
        outcome
    }

    /// The broker delivered an error instead of a message
    pub fn on_listener_error(&self, error: &dyn std::error::Error) {
        warn!(error = %error, "Consumer received exception");
        self.completion.fire();
    }

    async fn process(&self, payload: InboundPayload) -> PersistenceOutcome {
        if payload.is_text {
            info!(
                text = %String::from_utf8_lossy(&payload.body),
                "Text message received"
            );
            return PersistenceOutcome::SkippedTextMessage;
        }

        let (attribution, artifact) = match classify(&payload.body) {
            Classified::Status(record) => {
                info!(
                    attribution = %record.attribution,
                    media_count = record.media.len(),
                    "Status received"
                );

                match self.resolver.resolve(&record).await {
                    Ok(Resolution::Fetched(artifact)) => (record.attribution, artifact),
                    Ok(Resolution::NoMedia) => {
                        debug!(attribution = %record.attribution, "Status has no media");
                        return PersistenceOutcome::SkippedNonImage;
                    }
                    Ok(Resolution::Ineligible { kind }) => {
                        debug!(
                            attribution = %record.attribution,
                            kind = ?kind,
                            "First media is not a still image"
                        );
                        return PersistenceOutcome::SkippedNonImage;
                    }
                    Err(e) => return PersistenceOutcome::Failed(e.into()),
                }
            }
            Classified::RawImage => {
                debug!("Not a status, treating the payload as a JPEG image");

                if self.settings.verify_raw_jpeg && !image_validator::looks_like_jpeg(&payload.body)
                {
                    debug!("Raw payload has no JPEG marker");
                    return PersistenceOutcome::SkippedNonImage;
                }

                let artifact = ImageArtifact {
                    bytes: payload.body,
                    extension: JPEG_EXTENSION,
                    is_still_image: true,
                };
                (self.settings.default_source.clone(), artifact)
            }
        };

        if !artifact.is_still_image {
            return PersistenceOutcome::SkippedNonImage;
        }

        self.upload(&attribution, artifact).await
    }

    async fn upload(&self, attribution: &str, artifact: ImageArtifact) -> PersistenceOutcome {
        let identity = derive_key(attribution, artifact.extension);
        let key = identity.prefixed_key(&self.settings.object_key_prefix);
        let size_bytes = artifact.bytes.len();

        let request = PutObjectRequest {
            bucket: self.settings.bucket.clone(),
            key: key.clone(),
            body: artifact.bytes,
            metadata: ObjectMetadata {
                content_type: JPEG_CONTENT_TYPE.to_string(),
                title: identity.object_name,
                content_length: size_bytes as u64,
            },
        };

        let started = Instant::now();
        let result =
            tokio::time::timeout(self.settings.upload_timeout, self.store.put_object(request))
                .await;
        metrics::histogram!("image_persistence.upload.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(Ok(())) => {
                metrics::counter!("image_persistence.bytes.uploaded").increment(size_bytes as u64);
                PersistenceOutcome::Uploaded(key)
            }
            Ok(Err(e)) => PersistenceOutcome::Failed(e.into()),
            Err(_) => PersistenceOutcome::Failed(
                StorageError::Timeout(self.settings.upload_timeout).into(),
            ),
        }
    }

    fn record(&self, outcome: &PersistenceOutcome) {
        match outcome {
            PersistenceOutcome::Uploaded(key) => {
                info!(key = %key, bucket = %self.settings.bucket, "Image persisted");
            }
            PersistenceOutcome::SkippedNonImage => {
                info!("Message carries no still image, nothing persisted");
            }
            PersistenceOutcome::SkippedTextMessage => {}
            PersistenceOutcome::Failed(PipelineError::Fetch(e)) => {
                warn!(error = %e, "Failed to fetch status media");
            }
            PersistenceOutcome::Failed(PipelineError::Storage(e)) => {
                error!(error = %e, bucket = %self.settings.bucket, "Failed to persist image");
            }
        }

        let counter = match outcome {
            PersistenceOutcome::Uploaded(_) => "image_persistence.messages.uploaded",
            PersistenceOutcome::SkippedNonImage => "image_persistence.messages.skipped_non_image",
            PersistenceOutcome::SkippedTextMessage => "image_persistence.messages.skipped_text",
            PersistenceOutcome::Failed(_) => "image_persistence.messages.failed",
        };
        metrics::counter!(counter).increment(1);
    }
}
