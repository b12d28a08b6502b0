use crate::config::KafkaConfig;
use crate::pipeline::{ImagePersistencePipeline, InboundPayload};
use anyhow::{Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Kafka consumer feeding the image topic into the persistence pipeline
pub struct ImageKafkaConsumer {
    consumer: StreamConsumer,
    pipeline: Arc<ImagePersistencePipeline>,
}

impl ImageKafkaConsumer {
    /// Create a new Kafka consumer subscribed to the image topic
    pub fn new(config: &KafkaConfig, pipeline: Arc<ImagePersistencePipeline>) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", config.enable_auto_commit.to_string())
            .set("session.timeout.ms", config.session_timeout_ms.to_string());

        // Configure SSL if enabled
        if config.ssl_enabled {
            client_config.set("security.protocol", "SASL_SSL");
            if let Some(ref ca_location) = config.ssl_ca_location {
                client_config.set("ssl.ca.location", ca_location);
            }
        }

        // Configure SASL if credentials provided
        if let (Some(ref username), Some(ref password)) =
            (&config.sasl_username, &config.sasl_password)
        {
            client_config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[config.image_topic.as_str()])
            .context("Failed to subscribe to image topic")?;

        info!(
            topic = %config.image_topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topic"
        );

        Ok(Self { consumer, pipeline })
    }

    /// Consume messages one at a time until the stream ends
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        info!("Connected. Awaiting messages");

        let mut message_stream = self.consumer.stream();

        while let Some(message_result) = message_stream.next().await {
            let payload = match message_result {
                Ok(message) => {
                    debug!(
                        partition = message.partition(),
                        offset = message.offset(),
                        "Message received"
                    );
                    to_inbound_payload(&message)
                }
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("image_persistence.kafka.errors").increment(1);
                    self.pipeline.on_listener_error(&e);
                    continue;
                }
            };

            let outcome = self.pipeline.handle(payload).await;
            debug!(outcome = %outcome, "Message handled");
        }

        Ok(())
    }
}

/// Convert a Kafka message into a pipeline payload
pub fn to_inbound_payload<M: Message>(message: &M) -> InboundPayload {
    let body = message.payload().unwrap_or(&[]).to_vec();

    let is_text = message
        .headers()
        .map(|headers| {
            headers.iter().any(|header| {
                header
                    .value
                    .is_some_and(|value| is_text_header(header.key, value))
            })
        })
        .unwrap_or(false);

    InboundPayload {
        body: body.into(),
        is_text,
    }
}

/// Whether a header marks the message as a text control message
fn is_text_header(key: &str, value: &[u8]) -> bool {
    let Ok(value) = std::str::from_utf8(value) else {
        return false;
    };
    let value = value.trim();

    if key.eq_ignore_ascii_case("message-type") {
        value.eq_ignore_ascii_case("text")
    } else if key.eq_ignore_ascii_case("content-type") {
        value
            .get(..5)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("text/"))
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::{Header, OwnedHeaders, OwnedMessage, Timestamp};

    fn message(payload: &[u8], headers: Option<OwnedHeaders>) -> OwnedMessage {
        OwnedMessage::new(
            Some(payload.to_vec()),
            None,
            "image-ingress".to_string(),
            Timestamp::NotAvailable,
            0,
            42,
            headers,
        )
    }

    #[test]
    fn test_binary_message_without_headers() {
        let payload = to_inbound_payload(&message(&[0xFF, 0xD8, 0xFF], None));
        assert!(!payload.is_text);
        assert_eq!(payload.body.as_ref(), &[0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn test_message_type_text_header() {
        let headers = OwnedHeaders::new().insert(Header {
            key: "message-type",
            value: Some("TEXT"),
        });
        let payload = to_inbound_payload(&message(b"hello", Some(headers)));
        assert!(payload.is_text);
        assert_eq!(payload.body.as_ref(), b"hello");
    }

    #[test]
    fn test_content_type_header() {
        let text = OwnedHeaders::new().insert(Header {
            key: "content-type",
            value: Some("text/plain; charset=utf-8"),
        });
        assert!(to_inbound_payload(&message(b"hi", Some(text))).is_text);

        let image = OwnedHeaders::new().insert(Header {
            key: "content-type",
            value: Some("image/jpeg"),
        });
        assert!(!to_inbound_payload(&message(b"hi", Some(image))).is_text);
    }

    #[test]
    fn test_unrelated_headers_do_not_mark_text() {
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "correlation-id",
                value: Some("text"),
            })
            .insert(Header::<&str> {
                key: "message-type",
                value: None,
            });
        assert!(!to_inbound_payload(&message(b"{}", Some(headers))).is_text);
    }

    #[test]
    fn test_missing_payload_is_empty() {
        let message = OwnedMessage::new(
            None,
            None,
            "image-ingress".to_string(),
            Timestamp::NotAvailable,
            0,
            0,
            None,
        );
        assert!(to_inbound_payload(&message).body.is_empty());
    }
}
