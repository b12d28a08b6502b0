//! Resolution of status media into image bytes.
//!
//! Only the first media reference of a status is considered. Its kind is
//! checked before anything is downloaded, so videos and GIFs never leave the
//! remote host.

use crate::config::MediaConfig;
use crate::image_validator;
use crate::status::{MediaKind, StatusRecord};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors raised while fetching remote media
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid media URL: {0}")]
    InvalidUrl(String),

    #[error("Media fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Media fetch failed: {0}")]
    Transport(String),

    #[error("Media URL returned status code: {0}")]
    Status(u16),

    #[error("Media too large: {size} bytes (max: {max} bytes)")]
    TooLarge { size: u64, max: u64 },
}

/// Fetches the body behind a media URL
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

/// Image content ready for persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub bytes: Bytes,
    pub extension: &'static str,
    pub is_still_image: bool,
}

/// What a status record resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The status references no media
    NoMedia,
    /// The first media is not a still image and was not downloaded
    Ineligible { kind: MediaKind },
    /// The first media was downloaded
    Fetched(ImageArtifact),
}

/// HTTP(S) media fetcher with bounded request time and body size
pub struct HttpMediaFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: u64,
}

impl HttpMediaFetcher {
    pub fn new(config: &MediaConfig) -> Result<Self, reqwest::Error> {
        let timeout = config.fetch_timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self::with_client(client, timeout, config.max_bytes))
    }

    /// Build around an existing client; `timeout` is only used for reporting
    pub fn with_client(client: reqwest::Client, timeout: Duration, max_bytes: usize) -> Self {
        Self {
            client,
            timeout,
            max_bytes: max_bytes as u64,
        }
    }

    fn map_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?;

        // Only allow HTTP/HTTPS
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(FetchError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let Some(size) = response.content_length() {
            if size > self.max_bytes {
                return Err(FetchError::TooLarge {
                    size,
                    max: self.max_bytes,
                });
            }
        }

        // Content-Length may be absent (chunked) or wrong, so cap while reading
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_error(e))? {
            let size = (body.len() + chunk.len()) as u64;
            if size > self.max_bytes {
                return Err(FetchError::TooLarge {
                    size,
                    max: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body.freeze())
    }
}

/// Applies the first-media policy to a status record
#[derive(Clone)]
pub struct MediaResolver {
    fetcher: Arc<dyn MediaFetcher>,
}

impl MediaResolver {
    pub fn new(fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self { fetcher }
    }

    /// Resolve the first media reference of `record`
    pub async fn resolve(&self, record: &StatusRecord) -> Result<Resolution, FetchError> {
        let Some(media) = record.media.first() else {
            return Ok(Resolution::NoMedia);
        };

        if record.media.len() > 1 {
            debug!(
                attribution = %record.attribution,
                ignored = record.media.len() - 1,
                "Only the first media of a status is persisted"
            );
        }

        let (extension, is_still_image) = image_validator::validate(media.kind);
        if !is_still_image {
            return Ok(Resolution::Ineligible { kind: media.kind });
        }

        if media.url.is_empty() {
            return Err(FetchError::InvalidUrl("first media has no URL".to_string()));
        }

        let started = Instant::now();
        let result = self.fetcher.fetch(&media.url).await;
        metrics::histogram!("image_persistence.fetch.duration_seconds")
            .record(started.elapsed().as_secs_f64());
        let bytes = result?;

        debug!(url = %media.url, size_bytes = bytes.len(), "Fetched status media");

        Ok(Resolution::Fetched(ImageArtifact {
            bytes,
            extension,
            is_still_image,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::MediaReference;
    use std::io::Write;

    fn record(media: &[(&str, MediaKind)]) -> StatusRecord {
        StatusRecord {
            attribution: "alice".to_string(),
            media: media
                .iter()
                .map(|(url, kind)| MediaReference {
                    url: url.to_string(),
                    kind: *kind,
                })
                .collect(),
        }
    }

    fn media_config(max_bytes: usize, fetch_timeout_secs: u64) -> MediaConfig {
        MediaConfig {
            fetch_timeout_secs,
            max_bytes,
            ..MediaConfig::default()
        }
    }

    #[tokio::test]
    async fn test_resolve_fetches_only_first_media() {
        let mut fetcher = MockMediaFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|url| url == "https://x/first.jpg")
            .times(1)
            .returning(|_| Ok(Bytes::from_static(&[0xFF, 0xD8, 0xFF])));

        let resolver = MediaResolver::new(Arc::new(fetcher));
        let resolution = resolver
            .resolve(&record(&[
                ("https://x/first.jpg", MediaKind::Photo),
                ("https://x/second.jpg", MediaKind::Photo),
            ]))
            .await
            .unwrap();

        assert_eq!(
            resolution,
            Resolution::Fetched(ImageArtifact {
                bytes: Bytes::from_static(&[0xFF, 0xD8, 0xFF]),
                extension: "jpg",
                is_still_image: true,
            })
        );
    }

    #[tokio::test]
    async fn test_resolve_empty_media() {
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().times(0);

        let resolver = MediaResolver::new(Arc::new(fetcher));
        assert_eq!(resolver.resolve(&record(&[])).await.unwrap(), Resolution::NoMedia);
    }

    #[tokio::test]
    async fn test_resolve_skips_download_of_non_still_media() {
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().times(0);

        let resolver = MediaResolver::new(Arc::new(fetcher));
        let resolution = resolver
            .resolve(&record(&[
                ("https://x/clip.mp4", MediaKind::Video),
                ("https://x/photo.jpg", MediaKind::Photo),
            ]))
            .await
            .unwrap();

        assert_eq!(resolution, Resolution::Ineligible { kind: MediaKind::Video });
    }

    #[tokio::test]
    async fn test_resolve_first_media_without_url() {
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().times(0);
        let resolver = MediaResolver::new(Arc::new(fetcher));

        let skipped = resolver
            .resolve(&record(&[("", MediaKind::Video), ("https://x/b.jpg", MediaKind::Photo)]))
            .await
            .unwrap();
        assert_eq!(skipped, Resolution::Ineligible { kind: MediaKind::Video });

        let err = resolver
            .resolve(&record(&[("", MediaKind::Photo), ("https://x/b.jpg", MediaKind::Photo)]))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_resolve_propagates_fetch_error() {
        let mut fetcher = MockMediaFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Err(FetchError::Status(404)));

        let resolver = MediaResolver::new(Arc::new(fetcher));
        let err = resolver
            .resolve(&record(&[("https://x/gone.jpg", MediaKind::Photo)]))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status(404)));
    }

    #[tokio::test]
    async fn test_http_fetcher_returns_body() {
        let mut server = mockito::Server::new_async().await;
        let body = vec![7u8; 1200];
        let mock = server
            .mock("GET", "/media/a.jpg")
            .with_status(200)
            .with_header("content-type", "image/jpeg")
            .with_body(body.clone())
            .create_async()
            .await;

        let fetcher = HttpMediaFetcher::new(&media_config(1024 * 1024, 5)).unwrap();
        let bytes = fetcher
            .fetch(&format!("{}/media/a.jpg", server.url()))
            .await
            .unwrap();

        assert_eq!(bytes.len(), 1200);
        assert_eq!(bytes.as_ref(), body.as_slice());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_non_success_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/media/missing.jpg")
            .with_status(404)
            .create_async()
            .await;

        let fetcher = HttpMediaFetcher::new(&media_config(1024, 5)).unwrap();
        let err = fetcher
            .fetch(&format!("{}/media/missing.jpg", server.url()))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status(404)));
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_oversized_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/media/big.jpg")
            .with_status(200)
            .with_body(vec![0u8; 2048])
            .create_async()
            .await;

        let fetcher = HttpMediaFetcher::new(&media_config(1024, 5)).unwrap();
        let err = fetcher
            .fetch(&format!("{}/media/big.jpg", server.url()))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::TooLarge { size: 2048, max: 1024 }));
    }

    #[tokio::test]
    async fn test_http_fetcher_caps_chunked_body_without_length() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/media/stream.jpg")
            .with_status(200)
            .with_chunked_body(|w| {
                for _ in 0..8 {
                    w.write_all(&[0u8; 512])?;
                }
                Ok(())
            })
            .create_async()
            .await;

        let fetcher = HttpMediaFetcher::new(&media_config(1024, 5)).unwrap();
        let err = fetcher
            .fetch(&format!("{}/media/stream.jpg", server.url()))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::TooLarge { size, max: 1024 } if size > 1024));
    }

    #[tokio::test]
    async fn test_http_fetcher_accepts_chunked_body_under_cap() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/media/small.jpg")
            .with_status(200)
            .with_chunked_body(|w| {
                w.write_all(&[0xFF, 0xD8, 0xFF])?;
                w.write_all(&[0u8; 300])
            })
            .create_async()
            .await;

        let fetcher = HttpMediaFetcher::new(&media_config(1024, 5)).unwrap();
        let bytes = fetcher
            .fetch(&format!("{}/media/small.jpg", server.url()))
            .await
            .unwrap();

        assert_eq!(bytes.len(), 303);
        assert!(bytes.starts_with(&[0xFF, 0xD8, 0xFF]));
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_unsupported_scheme() {
        let fetcher = HttpMediaFetcher::new(&media_config(1024, 5)).unwrap();

        assert!(matches!(
            fetcher.fetch("file:///etc/passwd").await,
            Err(FetchError::InvalidUrl(_))
        ));
        assert!(matches!(
            fetcher.fetch("not a url").await,
            Err(FetchError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_http_fetcher_times_out_on_silent_host() {
        // Accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let fetcher = HttpMediaFetcher::with_client(client, Duration::from_millis(200), 1024);

        let err = fetcher
            .fetch(&format!("http://{}/media/slow.jpg", addr))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Timeout(_)));
    }
}
