//! One traversal of the library roots.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::batch::ScanBatch;
use super::name_match::{name_match, UNKNOWN_NAME};
use super::playlist::parse_playlist;
use super::tags::{FileSkip, TagReader};
use super::{ScanError, ScanListener, ScanReport, ScanSettings};
use crate::catalog_store::{
    Album, Artist, CatalogStore, EntityKind, Playlist, PlaylistEntry, Song, SyncMeta,
};
use crate::enrichment::{EnrichmentError, EnrichmentQueue, EnrichmentTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileClass {
    Song,
    Playlist,
    Ignored,
}

pub(super) fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "ogg" => "application/ogg",
        "m4a" | "m4p" => "audio/mp4a-latm",
        "mp4" => "audio/mp4",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

fn mtime_millis(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub(super) struct Crawl<'a> {
    store: &'a dyn CatalogStore,
    batch: &'a ScanBatch,
    tags: &'a dyn TagReader,
    queue: Option<&'a EnrichmentQueue>,
    settings: &'a ScanSettings,
    cancel: &'a CancellationToken,
    listener: Option<&'a dyn ScanListener>,
    /// Songs already handled in this scan, by filename.
    resolved: HashMap<String, Option<i64>>,
    report: ScanReport,
}

impl<'a> Crawl<'a> {
    pub(super) fn new(
        store: &'a dyn CatalogStore,
        batch: &'a ScanBatch,
        tags: &'a dyn TagReader,
        queue: Option<&'a EnrichmentQueue>,
        settings: &'a ScanSettings,
        cancel: &'a CancellationToken,
        listener: Option<&'a dyn ScanListener>,
    ) -> Self {
        Self {
            store,
            batch,
            tags,
            queue,
            settings,
            cancel,
            listener,
            resolved: HashMap::new(),
            report: ScanReport {
                complete: true,
                ..Default::default()
            },
        }
    }

    /// Walks every root and returns the counters. The batch is left open.
    pub(super) fn run(mut self) -> Result<ScanReport, ScanError> {
        let settings = self.settings;
        for root in &settings.roots {
            self.walk_root(root)?;
        }
        Ok(self.report)
    }

    fn check_cancel(&self) -> Result<(), ScanError> {
        if self.cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        Ok(())
    }

    fn walk_root(&mut self, root: &Path) -> Result<(), ScanError> {
        let root = match root.canonicalize() {
            Ok(root) if root.is_dir() => root,
            Ok(root) => {
                warn!("Library root {} is not a directory", root.display());
                self.report.complete = false;
                return Ok(());
            }
            Err(e) => {
                warn!("Library root {} is unreadable: {}", root.display(), e);
                self.report.complete = false;
                return Ok(());
            }
        };
        debug!("Scanning {}", root.display());

        for entry in WalkDir::new(&root).follow_links(true).sort_by_file_name() {
            self.check_cancel()?;
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // files under an unreadable directory would look removed
                    warn!("Failed to read library entry: {}", e);
                    self.report.complete = false;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            self.report.files_seen += 1;
            if let Some(listener) = self.listener {
                listener.on_progress(self.report.files_seen);
            }
            // files reached through links are stored under their target, as
            // playlist entries are
            let path = match entry.path().canonicalize() {
                Ok(path) => path,
                Err(e) => {
                    self.skip(entry.path(), FileSkip::Unreadable(e));
                    continue;
                }
            };
            match self.classify(&path) {
                FileClass::Song => {
                    self.handle_song(&path)?;
                }
                FileClass::Playlist => self.handle_playlist(&path)?,
                FileClass::Ignored => {}
            }
        }
        Ok(())
    }

    fn classify(&self, path: &Path) -> FileClass {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return FileClass::Ignored;
        };
        let ext = ext.to_ascii_lowercase();
        if self.settings.song_extensions.contains(&ext) {
            FileClass::Song
        } else if self.settings.playlist_extensions.contains(&ext) {
            FileClass::Playlist
        } else {
            FileClass::Ignored
        }
    }

    fn skip(&mut self, path: &Path, reason: FileSkip) {
        warn!("Skipping {}: {}", path.display(), reason);
        self.report.files_skipped += 1;
    }

    fn enqueue(&self, task: EnrichmentTask) -> Result<(), ScanError> {
        let Some(queue) = self.queue else {
            return Ok(());
        };
        match queue.submit(task) {
            Ok(()) => Ok(()),
            Err(EnrichmentError::Cancelled) => Err(ScanError::Cancelled),
            Err(e) => {
                warn!("Failed to queue enrichment: {}", e);
                Ok(())
            }
        }
    }

    /// Returns the song's id, or `None` if the file was skipped. Each file is
    /// handled once per scan, later visits get the first outcome.
    fn handle_song(&mut self, path: &Path) -> Result<Option<i64>, ScanError> {
        let filename = path.to_string_lossy().into_owned();
        if let Some(outcome) = self.resolved.get(&filename) {
            return Ok(*outcome);
        }
        let outcome = self.resolve_song(path, filename.clone())?;
        self.resolved.insert(filename, outcome);
        Ok(outcome)
    }

    fn resolve_song(&mut self, path: &Path, filename: String) -> Result<Option<i64>, ScanError> {
        let existing = self.store.find_song_by_filename(&filename)?;
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                self.skip(path, FileSkip::Unreadable(e));
                return Ok(None);
            }
        };
        let mtime = mtime_millis(&metadata);

        if let Some(song) = &existing {
            if song.mtime == mtime {
                self.store.clear_song_mark(song.meta.id)?;
                self.report.songs_unchanged += 1;
                return Ok(Some(song.meta.id));
            }
        }

        let tags = match self.tags.read(path) {
            Ok(tags) => tags,
            Err(reason) => {
                self.skip(path, reason);
                return self.keep_existing(existing.as_ref());
            }
        };
        let Some(title) = tags.title else {
            self.skip(path, FileSkip::MissingTitle);
            return self.keep_existing(existing.as_ref());
        };
        let artist = tags.artist.unwrap_or_else(|| UNKNOWN_NAME.to_string());
        let album = tags.album.unwrap_or_else(|| UNKNOWN_NAME.to_string());

        let (artist_id, artist) = self.resolve_artist(&artist)?;
        let album_id = self.resolve_album(artist_id, &artist, &album)?;

        let now = self.store.next_sync_time();
        let (meta, mbid) = match existing {
            Some(song) => {
                let id = song.meta.id;
                let sync_id = song.meta.sync_id.unwrap_or_else(|| id.to_string());
                (
                    SyncMeta {
                        id,
                        sync_time: now,
                        sync_id: Some(sync_id),
                    },
                    song.mbid,
                )
            }
            None => (
                SyncMeta::local(self.store.reserve_id(EntityKind::Song)?, now),
                None,
            ),
        };
        let id = meta.id;
        let song = Song {
            meta,
            artist_id,
            album_id,
            mbid,
            filename,
            mime_type: mime_type_for(path).to_string(),
            mtime,
            bitrate: tags.bitrate.map(i64::from),
            filesize: metadata.len() as i64,
            length: tags.length.map(|l| l as i64),
            title,
            track: tags.track.map(i64::from),
            mark: false,
        };
        self.batch.with_staging(|s| s.stage(&song))?;
        self.report.songs_staged += 1;
        Ok(Some(id))
    }

    /// A file still on disk keeps its row and stale attributes when its tags
    /// can't be read this time.
    fn keep_existing(&mut self, existing: Option<&Song>) -> Result<Option<i64>, ScanError> {
        let Some(song) = existing else {
            return Ok(None);
        };
        self.store.clear_song_mark(song.meta.id)?;
        Ok(Some(song.meta.id))
    }

    /// Returns the artist's id and stored name.
    fn resolve_artist(&mut self, name: &str) -> Result<(i64, String), ScanError> {
        let key = name_match(name);
        let staged = self.batch.with_staging(|s| match s.find_artist_id(&key)? {
            Some(id) => s.get::<Artist>(id),
            None => Ok(None),
        })?;
        if let Some(artist) = staged {
            return Ok((artist.meta.id, artist.name));
        }
        if let Some(artist) = self.store.find_artist_by_name_match(&key)? {
            return Ok((artist.meta.id, artist.name));
        }

        let id = self.store.reserve_id(EntityKind::Artist)?;
        let now = self.store.next_sync_time();
        let artist = Artist {
            meta: SyncMeta::local(id, now),
            mbid: None,
            name: name.to_string(),
            name_match: key,
            discovery_date: Some(now),
        };
        self.batch.with_staging(|s| s.stage(&artist))?;
        debug!("New artist {} ({})", id, name);
        self.enqueue(EnrichmentTask::Artist {
            id,
            name: name.to_string(),
        })?;
        Ok((id, name.to_string()))
    }

    fn resolve_album(
        &mut self,
        artist_id: i64,
        artist: &str,
        name: &str,
    ) -> Result<i64, ScanError> {
        let key = name_match(name);
        if let Some(id) = self
            .batch
            .with_staging(|s| s.find_album_id(artist_id, &key))?
        {
            return Ok(id);
        }
        if let Some(album) = self.store.find_album_by_name_match(artist_id, &key)? {
            return Ok(album.meta.id);
        }

        let id = self.store.reserve_id(EntityKind::Album)?;
        let now = self.store.next_sync_time();
        let album = Album {
            meta: SyncMeta::local(id, now),
            artist_id,
            mbid: None,
            name: name.to_string(),
            name_match: key,
            discovery_date: Some(now),
        };
        self.batch.with_staging(|s| s.stage(&album))?;
        debug!("New album {} ({} - {})", id, artist, name);
        self.enqueue(EnrichmentTask::Album {
            id,
            artist: artist.to_string(),
            album: name.to_string(),
        })?;
        Ok(id)
    }

    fn playlist_songs(&mut self, entries: Vec<PathBuf>) -> Result<Vec<i64>, ScanError> {
        let mut song_ids = Vec::with_capacity(entries.len());
        for entry in entries {
            self.check_cancel()?;
            let entry = match entry.canonicalize() {
                Ok(entry) if entry.is_file() => entry,
                _ => {
                    debug!("Playlist entry {} does not exist", entry.display());
                    continue;
                }
            };
            if self.classify(&entry) != FileClass::Song {
                debug!("Playlist entry {} is not a song", entry.display());
                continue;
            }
            if let Some(id) = self.handle_song(&entry)? {
                song_ids.push(id);
            }
        }
        Ok(song_ids)
    }

    fn handle_playlist(&mut self, path: &Path) -> Result<(), ScanError> {
        let entries = match parse_playlist(path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Can't handle playlist {}: {}", path.display(), e);
                self.report.files_skipped += 1;
                return Ok(());
            }
        };
        let song_ids = self.playlist_songs(entries)?;

        let filename = path.to_string_lossy().into_owned();
        let existing = self.store.find_playlist_by_filename(&filename)?;
        let now = self.store.next_sync_time();

        let (playlist, old_entries) = match existing {
            Some(playlist) => {
                let old_entries = self.store.get_playlist_entries(playlist.meta.id)?;
                let unchanged = old_entries
                    .iter()
                    .map(|e| e.song_id)
                    .eq(song_ids.iter().copied());
                if unchanged {
                    self.store.clear_playlist_mark(playlist.meta.id)?;
                    return Ok(());
                }
                let id = playlist.meta.id;
                let sync_id = playlist.meta.sync_id.unwrap_or_else(|| id.to_string());
                let updated = Playlist {
                    meta: SyncMeta {
                        id,
                        sync_time: now,
                        sync_id: Some(sync_id),
                    },
                    mark: false,
                    ..playlist
                };
                (updated, old_entries)
            }
            None => {
                if song_ids.is_empty() {
                    warn!("Playlist {} has no usable entries", path.display());
                    self.report.files_skipped += 1;
                    return Ok(());
                }
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| filename.clone());
                let playlist = Playlist {
                    meta: SyncMeta::local(self.store.reserve_id(EntityKind::Playlist)?, now),
                    filename,
                    name,
                    created_date: Some(now),
                    mark: false,
                };
                (playlist, vec![])
            }
        };

        let mut new_entries = Vec::with_capacity(song_ids.len());
        for (position, song_id) in song_ids.into_iter().enumerate() {
            new_entries.push(PlaylistEntry {
                meta: SyncMeta::local(self.store.reserve_id(EntityKind::PlaylistEntry)?, now),
                playlist_id: playlist.meta.id,
                position: position as i64,
                song_id,
            });
        }

        self.batch.with_staging(|s| {
            s.stage(&playlist)?;
            for old in &old_entries {
                s.stage_tombstone(EntityKind::PlaylistEntry, old.meta.id, now)?;
            }
            for entry in &new_entries {
                s.stage(entry)?;
            }
            Ok(())
        })?;
        debug!(
            "Staged playlist {} with {} entries",
            playlist.filename,
            new_entries.len()
        );
        self.report.playlists_staged += 1;
        Ok(())
    }
}
