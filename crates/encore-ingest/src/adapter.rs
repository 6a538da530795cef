//! The ingestion adapter: the only way requests enter the queue.
//!
//! Order of work for one submission:
//! 1. field validation
//! 2. link recognition and canonicalisation
//! 3. metadata lookup (network, outside the engine)
//! 4. `EngineHandle::submit`
//!
//! Dropping the future before step 4 leaves no trace in the queue.

use std::sync::Arc;

use encore_core::{EngineHandle, NewRequest};
use encore_types::{Requester, SongRequest};
use validator::Validate;

use crate::error::IngestError;
use crate::form::SubmissionForm;
use crate::link::parse_video_link;
use crate::metadata::MetadataSource;

/// Turns raw submissions into queued requests.
#[derive(Clone)]
pub struct IngestionAdapter {
    engine: EngineHandle,
    metadata: Arc<dyn MetadataSource>,
}

impl IngestionAdapter {
    /// Create an adapter feeding `engine`, resolving links with `metadata`.
    pub fn new(engine: EngineHandle, metadata: Arc<dyn MetadataSource>) -> Self {
        Self { engine, metadata }
    }

    /// Validate, resolve, and submit.
    ///
    /// A failed lookup is tolerated when the form carries its own title;
    /// the request is queued without duration or artwork.
    ///
    /// # Errors
    ///
    /// [`IngestError::Validation`], [`IngestError::UnsupportedLink`],
    /// [`IngestError::Metadata`], or the engine's [`IngestError::Queue`].
    pub async fn submit(&self, form: SubmissionForm) -> Result<SongRequest, IngestError> {
        form.validate()?;
        let candidate = self.resolve(form).await?;
        let accepted = self.engine.submit(candidate).await?;
        Ok(accepted)
    }

    async fn resolve(&self, form: SubmissionForm) -> Result<NewRequest, IngestError> {
        let SubmissionForm {
            requester_login,
            requester_display_name,
            song_link,
            song_title,
            request_type,
            priority,
            submitted_at,
        } = form;

        let display_name = requester_display_name.unwrap_or_else(|| requester_login.clone());
        let requester = Requester::new(display_name, &requester_login);

        let Some(video) = parse_video_link(&song_link) else {
            let title = song_title.ok_or_else(|| IngestError::UnsupportedLink(song_link.clone()))?;
            let mut candidate = NewRequest::new(requester, title, song_link, request_type);
            candidate.priority = priority;
            candidate.submitted_at = submitted_at;
            return Ok(candidate);
        };

        let mut candidate = match self.metadata.lookup(&video).await {
            Ok(metadata) => {
                let title = song_title.unwrap_or(metadata.title);
                let mut candidate =
                    NewRequest::new(requester, title, video.canonical_url(), request_type)
                        .with_duration(metadata.duration_seconds);
                candidate.thumbnail_url = metadata.thumbnail_url;
                candidate.channel_name = metadata.channel_name;
                candidate
            }
            Err(e) => {
                let Some(title) = song_title else {
                    return Err(e);
                };
                tracing::warn!(video_id = %video.video_id, error = %e, "Metadata lookup failed, using supplied title");
                NewRequest::new(requester, title, video.canonical_url(), request_type)
            }
        };
        candidate.priority = priority;
        candidate.submitted_at = submitted_at;
        Ok(candidate)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use encore_core::{AllowAll, BroadcastHub, EngineSettings, QueueEngine, QueueError};
    use encore_db::{InMemoryRepository, VideoMetadata};
    use encore_types::{Priority, RequestType};

    use super::*;
    use crate::link::VideoLink;

    struct FixedSource(Option<VideoMetadata>);

    #[async_trait]
    impl MetadataSource for FixedSource {
        async fn lookup(&self, _video: &VideoLink) -> Result<VideoMetadata, IngestError> {
            self.0
                .clone()
                .ok_or_else(|| IngestError::Metadata(String::from("upstream down")))
        }
    }

    async fn adapter(source: FixedSource) -> (IngestionAdapter, Arc<BroadcastHub>) {
        let hub = Arc::new(BroadcastHub::new(16, 50));
        let engine = QueueEngine::load(
            Arc::new(InMemoryRepository::new()),
            Arc::clone(&hub),
            Box::new(AllowAll),
            EngineSettings::default(),
        )
        .await
        .unwrap();
        let (handle, _task) = engine.spawn();
        (IngestionAdapter::new(handle, Arc::new(source)), hub)
    }

    fn rick() -> VideoMetadata {
        VideoMetadata {
            title: String::from("Never Gonna Give You Up"),
            duration_seconds: Some(213),
            thumbnail_url: Some(String::from("https://i.ytimg.com/vi/dQw4w9WgXcQ/hq.jpg")),
            channel_name: Some(String::from("Rick Astley")),
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn resolved_request_is_canonical_and_enriched() {
        let (adapter, hub) = adapter(FixedSource(Some(rick()))).await;
        let mut form = SubmissionForm::new("Alice", "https://youtu.be/dQw4w9WgXcQ", RequestType::Donation);
        form.requester_display_name = Some(String::from("Alice_Live"));

        let accepted = adapter.submit(form).await.unwrap();
        assert_eq!(accepted.song_link, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(accepted.song_title, "Never Gonna Give You Up");
        assert_eq!(accepted.duration_seconds, Some(213));
        assert_eq!(accepted.requester.login, "alice");
        assert_eq!(accepted.requester.display_name, "Alice_Live");
        assert_eq!(accepted.priority, Priority::High);
        assert_eq!(hub.snapshot().await.queue.len(), 1);
    }

    #[tokio::test]
    async fn failed_lookup_without_title_queues_nothing() {
        let (adapter, hub) = adapter(FixedSource(None)).await;
        let form = SubmissionForm::new("bob", "https://youtu.be/dQw4w9WgXcQ", RequestType::ChannelPoints);
        assert!(matches!(
            adapter.submit(form).await,
            Err(IngestError::Metadata(_))
        ));
        assert!(hub.snapshot().await.queue.is_empty());
    }

    #[tokio::test]
    async fn failed_lookup_with_title_still_queues() {
        let (adapter, _hub) = adapter(FixedSource(None)).await;
        let mut form = SubmissionForm::new("bob", "https://youtu.be/dQw4w9WgXcQ", RequestType::ChannelPoints);
        form.song_title = Some(String::from("Some Song"));
        let accepted = adapter.submit(form).await.unwrap();
        assert_eq!(accepted.song_title, "Some Song");
        assert!(accepted.duration_seconds.is_none());
    }

    #[tokio::test]
    async fn foreign_links_need_a_title() {
        let (adapter, _hub) = adapter(FixedSource(Some(rick()))).await;
        let form = SubmissionForm::new("bob", "https://example.com/song.mp3", RequestType::Donation);
        assert!(matches!(
            adapter.submit(form.clone()).await,
            Err(IngestError::UnsupportedLink(_))
        ));

        let mut titled = form;
        titled.song_title = Some(String::from("Live Demo"));
        let accepted = adapter.submit(titled).await.unwrap();
        assert_eq!(accepted.song_link, "https://example.com/song.mp3");
    }

    #[tokio::test]
    async fn invalid_form_never_reaches_the_engine() {
        let (adapter, hub) = adapter(FixedSource(Some(rick()))).await;
        let form = SubmissionForm::new("bob", "definitely not a url", RequestType::Donation);
        assert!(matches!(
            adapter.submit(form).await,
            Err(IngestError::Validation(_))
        ));
        assert!(hub.snapshot().await.queue.is_empty());
    }

    #[tokio::test]
    async fn engine_rejections_pass_through() {
        let (adapter, _hub) = adapter(FixedSource(Some(rick()))).await;
        adapter
            .engine
            .set_setting(encore_types::QUEUE_ENABLED, serde_json::json!(false))
            .await
            .unwrap();
        let form = SubmissionForm::new("bob", "https://youtu.be/dQw4w9WgXcQ", RequestType::Donation);
        assert!(matches!(
            adapter.submit(form).await,
            Err(IngestError::Queue(QueueError::Policy(_)))
        ));
    }
}
