//! CatalogStore trait definition.

use anyhow::Result;

use super::models::{
    Album, Artist, EntityKind, ImageData, Playlist, PlaylistEntry, Record, Song,
};
use super::staging::StagingStore;
use crate::sync::{ChangeCounts, MergeReport};

/// Rows removed by a sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub songs: usize,
    pub playlists: usize,
    pub playlist_entries: usize,
}

/// Canonical storage of the library catalog.
///
/// Every method is atomic with respect to the others: implementations hold
/// their connection for the whole call.
pub trait CatalogStore: Send + Sync {
    // =========================================================================
    // Sync Clock and Identity
    // =========================================================================

    /// Returns a timestamp strictly greater than any previously returned one
    /// and than every `sync_time` stored when the store was opened.
    fn next_sync_time(&self) -> i64;

    /// Reserves the next id of `kind`. Reserved ids are never handed out twice.
    fn reserve_id(&self, kind: EntityKind) -> Result<i64>;

    // =========================================================================
    // Scanner Support
    // =========================================================================

    /// Sets `mark` on every song and playlist.
    fn mark_all_stale(&self) -> Result<()>;

    fn find_song_by_filename(&self, filename: &str) -> Result<Option<Song>>;

    fn clear_song_mark(&self, id: i64) -> Result<()>;

    fn find_artist_by_name_match(&self, name_match: &str) -> Result<Option<Artist>>;

    fn find_album_by_name_match(&self, artist_id: i64, name_match: &str)
        -> Result<Option<Album>>;

    fn find_playlist_by_filename(&self, filename: &str) -> Result<Option<Playlist>>;

    fn clear_playlist_mark(&self, id: i64) -> Result<()>;

    /// Entries of a playlist ordered by position.
    fn get_playlist_entries(&self, playlist_id: i64) -> Result<Vec<PlaylistEntry>>;

    /// Merges every table of `staging` in one transaction.
    fn commit_staging(&self, staging: &StagingStore) -> Result<MergeReport>;

    /// Tombstones songs and playlists still marked stale, with their entries.
    fn sweep_stale(&self) -> Result<SweepReport>;

    // =========================================================================
    // Enrichment
    // =========================================================================

    /// Returns false when the row does not exist.
    fn set_mbid(&self, kind: EntityKind, id: i64, mbid: &str) -> Result<bool>;

    /// Replaces every stored image of an entity and bumps its `sync_time`.
    fn replace_images(&self, kind: EntityKind, id: i64, images: &[ImageData]) -> Result<()>;

    /// Stores one size of an entity's image, replacing that size only.
    fn put_image(&self, kind: EntityKind, id: i64, width: u32, height: u32, data: &[u8])
        -> Result<()>;

    // =========================================================================
    // Reads
    // =========================================================================

    fn get_song(&self, id: i64) -> Result<Option<Song>>;

    fn get_record(&self, kind: EntityKind, id: i64) -> Result<Option<Record>>;

    fn get_image(&self, kind: EntityKind, id: i64, width: u32, height: u32)
        -> Result<Option<Vec<u8>>>;

    /// The stored image of the entity with the most pixels.
    fn get_largest_image(&self, kind: EntityKind, id: i64) -> Result<Option<Vec<u8>>>;

    fn count(&self, kind: EntityKind) -> Result<usize>;

    fn tombstone_count(&self, kind: EntityKind) -> Result<usize>;

    // =========================================================================
    // Feeds
    // =========================================================================

    /// Copies rows and tombstones of `kind` changed after `since` into `out`.
    fn find_local_changes(
        &self,
        kind: EntityKind,
        since: i64,
        out: &StagingStore,
    ) -> Result<ChangeCounts>;
}
