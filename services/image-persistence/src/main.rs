use anyhow::{Context, Result};
use image_persistence::{
    CompletionSignal, Config, HttpMediaFetcher, ImageKafkaConsumer, ImagePersistencePipeline,
    MediaResolver, PipelineSettings, S3ObjectStore,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        bucket = %config.s3.bucket,
        region = %config.s3.region,
        topic = %config.kafka.image_topic,
        "Starting Image Persistence Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store = Arc::new(S3ObjectStore::new(&config.s3).await);

    let fetcher = Arc::new(
        HttpMediaFetcher::new(&config.media).context("Failed to build media HTTP client")?,
    );

    let completion = CompletionSignal::new();

    let pipeline = Arc::new(ImagePersistencePipeline::new(
        PipelineSettings::from_config(&config),
        MediaResolver::new(fetcher),
        store,
        completion.clone(),
    ));

    let kafka_consumer = ImageKafkaConsumer::new(&config.kafka, pipeline)
        .context("Failed to initialize Kafka consumer")?;

    // Spawn Kafka consumer task
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = kafka_consumer.run().await {
            error!(error = %e, "Kafka consumer error");
        }
    });

    info!("Image persistence service started successfully");

    if config.service.exit_after_first_message {
        tokio::select! {
            _ = completion.wait() => {
                info!("First message processed");
            }
            _ = shutdown_signal() => {}
        }
    } else {
        shutdown_signal().await;
    }

    info!("Shutting down image persistence service");

    consumer_handle.abort();

    info!("Image persistence service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
