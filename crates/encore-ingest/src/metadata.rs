//! Video metadata lookup.
//!
//! Lookups happen before the request reaches the engine, so a slow
//! upstream only delays the one submitter waiting on it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use encore_db::{Repository, VideoMetadata};
use serde::Deserialize;

use crate::error::IngestError;
use crate::link::VideoLink;

/// Anything that can describe a video.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Resolve title, duration, thumbnail, and channel for `video`.
    async fn lookup(&self, video: &VideoLink) -> Result<VideoMetadata, IngestError>;
}

/// The subset of an oEmbed response we use.
#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    title: String,
    #[serde(default)]
    author_name: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
}

/// Looks videos up through an `oEmbed` endpoint.
///
/// `oEmbed` does not report duration, so `duration_seconds` is always
/// `None` from this source.
pub struct OEmbedSource {
    client: reqwest::Client,
    endpoint: String,
}

impl OEmbedSource {
    /// Create a source for `endpoint` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Metadata`] if the HTTP client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::Metadata(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_owned(),
        })
    }
}

#[async_trait]
impl MetadataSource for OEmbedSource {
    async fn lookup(&self, video: &VideoLink) -> Result<VideoMetadata, IngestError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("url", video.canonical_url().as_str()), ("format", "json")])
            .send()
            .await
            .map_err(|e| IngestError::Metadata(format!("oEmbed request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Metadata(format!(
                "oEmbed returned {status} for {}",
                video.video_id
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| IngestError::Metadata(format!("oEmbed body read failed: {e}")))?;
        parse_oembed(&body)
    }
}

fn parse_oembed(body: &str) -> Result<VideoMetadata, IngestError> {
    let parsed: OEmbedResponse = serde_json::from_str(body)
        .map_err(|e| IngestError::Metadata(format!("oEmbed response parse failed: {e}")))?;
    Ok(VideoMetadata {
        title: parsed.title,
        duration_seconds: None,
        thumbnail_url: parsed.thumbnail_url,
        channel_name: parsed.author_name,
        fetched_at: Utc::now(),
    })
}

/// Wraps another source with the repository's metadata cache.
///
/// Cache failures are logged and otherwise ignored; they never fail a
/// submission that the upstream could answer.
pub struct CachedMetadataSource<S> {
    inner: S,
    repository: Arc<dyn Repository>,
}

impl<S: MetadataSource> CachedMetadataSource<S> {
    /// Cache `inner`'s answers in `repository`.
    pub fn new(inner: S, repository: Arc<dyn Repository>) -> Self {
        Self { inner, repository }
    }
}

#[async_trait]
impl<S: MetadataSource> MetadataSource for CachedMetadataSource<S> {
    async fn lookup(&self, video: &VideoLink) -> Result<VideoMetadata, IngestError> {
        match self.repository.cached_metadata(&video.video_id).await {
            Ok(Some(hit)) => {
                tracing::debug!(video_id = %video.video_id, "Metadata cache hit");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(video_id = %video.video_id, error = %e, "Metadata cache read failed");
            }
        }

        let fresh = self.inner.lookup(video).await?;
        if let Err(e) = self.repository.cache_metadata(&video.video_id, &fresh).await {
            tracing::warn!(video_id = %video.video_id, error = %e, "Metadata cache write failed");
        }
        Ok(fresh)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use encore_db::InMemoryRepository;

    use super::*;

    struct CountingSource(AtomicU32);

    #[async_trait]
    impl MetadataSource for CountingSource {
        async fn lookup(&self, _video: &VideoLink) -> Result<VideoMetadata, IngestError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(VideoMetadata {
                title: String::from("Never Gonna Give You Up"),
                duration_seconds: Some(213),
                thumbnail_url: None,
                channel_name: Some(String::from("Rick Astley")),
                fetched_at: Utc::now(),
            })
        }
    }

    #[test]
    fn parses_oembed_fields() {
        let body = r#"{"title":"Song","author_name":"Artist","thumbnail_url":"https://i.ytimg.com/x.jpg","type":"video"}"#;
        let metadata = parse_oembed(body).unwrap();
        assert_eq!(metadata.title, "Song");
        assert_eq!(metadata.channel_name.as_deref(), Some("Artist"));
        assert!(metadata.duration_seconds.is_none());
    }

    #[test]
    fn malformed_oembed_is_a_metadata_error() {
        assert!(matches!(
            parse_oembed("<html>"),
            Err(IngestError::Metadata(_))
        ));
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let repo = Arc::new(InMemoryRepository::new());
        let store: Arc<dyn Repository> = Arc::clone(&repo) as Arc<dyn Repository>;
        let source = CachedMetadataSource::new(CountingSource(AtomicU32::new(0)), store);
        let video = VideoLink {
            video_id: String::from("dQw4w9WgXcQ"),
        };

        let first = source.lookup(&video).await.unwrap();
        let second = source.lookup(&video).await.unwrap();
        assert_eq!(first.title, second.title);
        assert_eq!(source.inner.0.load(Ordering::SeqCst), 1);
        assert!(repo.cached_metadata("dQw4w9WgXcQ").await.unwrap().is_some());
    }
}
