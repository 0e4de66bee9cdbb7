//! Background enrichment of newly discovered artists and albums.
//!
//! The scanner submits one [`EnrichmentTask`] per new artist or album to an
//! [`EnrichmentQueue`]. A single worker thread looks each one up through a
//! [`MetadataSource`] and writes the result to an [`EnrichmentTarget`],
//! keyed by the id the entity was given when it was staged.

mod artwork;
mod enricher;
mod lastfm;
mod queue;

pub use artwork::{scale_to_fill, thumbnail_set};
pub use enricher::Enricher;
pub use lastfm::{parse_album_info, parse_artist_info, LastFmClient};
pub use queue::{EnrichmentQueue, QueueStats, TaskRunner, DEFAULT_QUEUE_CAPACITY};

use crate::catalog_store::{EntityKind, ImageData};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentTask {
    Artist { id: i64, name: String },
    Album { id: i64, artist: String, album: String },
}

impl EnrichmentTask {
    pub fn kind(&self) -> EntityKind {
        match self {
            EnrichmentTask::Artist { .. } => EntityKind::Artist,
            EnrichmentTask::Album { .. } => EntityKind::Album,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            EnrichmentTask::Artist { id, .. } | EnrichmentTask::Album { id, .. } => *id,
        }
    }
}

impl std::fmt::Display for EnrichmentTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrichmentTask::Artist { id, name } => write!(f, "artist {} ({})", id, name),
            EnrichmentTask::Album { id, artist, album } => {
                write!(f, "album {} ({} - {})", id, artist, album)
            }
        }
    }
}

/// What a metadata lookup found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteInfo {
    pub mbid: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("cancelled")]
    Cancelled,
    #[error("queue is shut down")]
    Closed,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("metadata service error: {0}")]
    Api(String),
    #[error("bad image: {0}")]
    Image(#[from] image::ImageError),
}

/// An external source of artist and album metadata.
pub trait MetadataSource: Send + Sync {
    /// False for sources that never find anything, so no tasks are queued.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Returns `Ok(None)` when the service does not know the entity.
    fn lookup(
        &self,
        task: &EnrichmentTask,
        cancel: &CancellationToken,
    ) -> Result<Option<RemoteInfo>, EnrichmentError>;

    fn fetch_image(&self, url: &str, cancel: &CancellationToken)
        -> Result<Vec<u8>, EnrichmentError>;
}

/// Used when no metadata service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetadataSource;

impl MetadataSource for NoOpMetadataSource {
    fn is_enabled(&self) -> bool {
        false
    }

    fn lookup(
        &self,
        _task: &EnrichmentTask,
        _cancel: &CancellationToken,
    ) -> Result<Option<RemoteInfo>, EnrichmentError> {
        Ok(None)
    }

    fn fetch_image(
        &self,
        _url: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<u8>, EnrichmentError> {
        Err(EnrichmentError::Api("no metadata source configured".to_string()))
    }
}

/// Where enrichment results are written.
pub trait EnrichmentTarget: Send + Sync {
    fn set_mbid(&self, kind: EntityKind, id: i64, mbid: &str) -> anyhow::Result<()>;

    fn store_images(&self, kind: EntityKind, id: i64, images: &[ImageData]) -> anyhow::Result<()>;
}
