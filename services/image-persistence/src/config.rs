use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}

/// Main configuration for the image persistence service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Kafka configuration
    #[serde(default)]
    pub kafka: KafkaConfig,
    /// S3 configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Remote media fetch configuration
    #[serde(default)]
    pub media: MediaConfig,
    /// Persistence pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Stop once the first message has been processed (demo runs)
    #[serde(default)]
    pub exit_after_first_message: bool,
}

/// Kafka consumer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,
    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Topic carrying images and status objects
    #[serde(default = "default_image_topic")]
    pub image_topic: String,
    /// Auto offset reset policy
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Let the client commit offsets on its own
    #[serde(default = "default_true")]
    pub enable_auto_commit: bool,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
    /// Enable SSL
    #[serde(default)]
    pub ssl_enabled: bool,
    /// SSL CA certificate path
    pub ssl_ca_location: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for image storage
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Prefix prepended to every object key (may be empty)
    #[serde(default)]
    pub object_key_prefix: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Remote media fetch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Whole-request timeout in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Largest media body accepted, in bytes
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// User-Agent sent with media requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Persistence pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Attribution used when the payload is a raw image
    #[serde(default = "default_source")]
    pub default_source: String,
    /// Upload timeout in seconds
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    /// Require the JPEG SOI marker on raw payloads
    #[serde(default)]
    pub verify_raw_jpeg: bool,
}

// Default value functions
fn default_service_name() -> String {
    "image-persistence-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

fn default_consumer_group() -> String {
    "image-persistence".to_string()
}

fn default_image_topic() -> String {
    "image-ingress".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

fn default_bucket() -> String {
    "image-persistence".to_string()
}

fn default_region() -> String {
    "us-east-2".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_max_bytes() -> usize {
    25 * 1024 * 1024 // 25MB
}

fn default_user_agent() -> String {
    concat!("image-persistence-service/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_source() -> String {
    "romo".to_string()
}

fn default_upload_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(
                config::File::with_name("config/image-persistence")
                    .required(false)
            )
            .add_source(
                config::File::with_name("/etc/image-persistence/image-persistence")
                    .required(false)
            )
            // Override with environment variables
            // IMAGE_PERSISTENCE__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("IMAGE_PERSISTENCE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.bucket.trim().is_empty() {
            return Err(ConfigError::MissingRequired("s3.bucket".to_string()));
        }

        if self.kafka.image_topic.trim().is_empty() {
            return Err(ConfigError::MissingRequired("kafka.image_topic".to_string()));
        }

        if self.pipeline.default_source.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "pipeline.default_source".to_string(),
            ));
        }

        for (key, value) in [
            ("media.fetch_timeout_secs", self.media.fetch_timeout_secs),
            ("media.connect_timeout_secs", self.media.connect_timeout_secs),
            ("pipeline.upload_timeout_secs", self.pipeline.upload_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "timeout must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Get upload timeout as Duration
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.upload_timeout_secs)
    }
}

impl MediaConfig {
    /// Get whole-request fetch timeout as Duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            exit_after_first_message: false,
        }
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            consumer_group: default_consumer_group(),
            image_topic: default_image_topic(),
            auto_offset_reset: default_auto_offset_reset(),
            enable_auto_commit: true,
            session_timeout_ms: default_session_timeout_ms(),
            ssl_enabled: false,
            ssl_ca_location: None,
            sasl_username: None,
            sasl_password: None,
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            object_key_prefix: String::new(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_bytes: default_max_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_source: default_source(),
            upload_timeout_secs: default_upload_timeout_secs(),
            verify_raw_jpeg: false,
        }
    }
}
