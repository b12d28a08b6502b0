//! Image Persistence Service
//!
//! Consumes messages from Kafka and persists the images they carry into S3.
//! A message body is either a JSON status object referencing remote media or
//! a raw image; there is no type tag, so every body is classified by
//! attempting to decode it as a status.
//!
//! ## Architecture
//!
//! ```text
//! Kafka Topic           Pipeline                                  S3 Bucket
//! ┌────────────┐       ┌──────────────────────────────────┐      ┌──────────────────────┐
//! │ image-     │       │ classify ──▶ status ──▶ resolve  │      │ {prefix}{source}-    │
//! │ ingress    │──────▶│    │                    (HTTP)   │─────▶│   {uuid}.jpg         │
//! └────────────┘       │    └──▶ raw image               │      └──────────────────────┘
//!                      │ validate ──▶ derive key ──▶ put  │
//!                      └──────────────────────────────────┘
//!                                     │
//!                                     ▼
//!                              Completion Signal
//! ```
//!
//! Every message ends in exactly one [`PersistenceOutcome`]; failures are
//! logged and counted, and the consumer moves on to the next message.

pub mod completion;
pub mod config;
pub mod image_validator;
pub mod kafka_consumer;
pub mod key_deriver;
pub mod media_resolver;
pub mod pipeline;
pub mod s3_uploader;
pub mod status;

pub use completion::CompletionSignal;
pub use config::{Config, ConfigError};
pub use kafka_consumer::ImageKafkaConsumer;
pub use key_deriver::{derive_key, StorageObjectIdentity};
pub use media_resolver::{
    FetchError, HttpMediaFetcher, ImageArtifact, MediaFetcher, MediaResolver, Resolution,
};
pub use pipeline::{
    ImagePersistencePipeline, InboundPayload, PersistenceOutcome, PipelineError,
    PipelineSettings,
};
pub use s3_uploader::{ObjectMetadata, ObjectStore, PutObjectRequest, S3ObjectStore, StorageError};
pub use status::{classify, Classified, MediaKind, MediaReference, StatusRecord};
