//! Ingestion adapter for the Encore request queue.
//!
//! Submissions from chat integrations and the REST endpoint pass through
//! here on their way to the queue engine. Everything slow (network
//! metadata lookups) happens in this crate, before the engine sees the
//! request.
//!
//! # Modules
//!
//! - [`form`] -- The validated submission payload
//! - [`link`] -- YouTube link recognition and canonicalisation
//! - [`metadata`] -- `oEmbed` lookup and the repository-backed cache
//! - [`adapter`] -- Validation, resolution, submission
//! - [`error`] -- Error types

pub mod adapter;
pub mod error;
pub mod form;
pub mod link;
pub mod metadata;

pub use adapter::IngestionAdapter;
pub use error::IngestError;
pub use form::SubmissionForm;
pub use link::{VideoLink, parse_video_link};
pub use metadata::{CachedMetadataSource, MetadataSource, OEmbedSource};
