//! Syncable entity models.
//!
//! Every entity carries a [`SyncMeta`] (local id, sync time, replica-stable
//! sync id) followed by its domain attributes. Domain attributes are listed
//! in the same order as the columns of the backing table.

use rusqlite::types::Value;
use rusqlite::Row;
use serde::Serialize;

use crate::sync::SyncRow;

/// The syncable entity types, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Artist,
    Album,
    Song,
    Playlist,
    PlaylistEntry,
}

impl EntityKind {
    /// Referenced kinds come before the kinds that reference them.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Artist,
        EntityKind::Album,
        EntityKind::Song,
        EntityKind::Playlist,
        EntityKind::PlaylistEntry,
    ];

    /// Name used in feed URLs, also the backing table name.
    pub fn feed_name(self) -> &'static str {
        match self {
            EntityKind::Artist => "artists",
            EntityKind::Album => "albums",
            EntityKind::Song => "songs",
            EntityKind::Playlist => "playlists",
            EntityKind::PlaylistEntry => "playlist_songs",
        }
    }

    pub fn from_feed_name(name: &str) -> Option<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.feed_name() == name)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.feed_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncMeta {
    pub id: i64,
    pub sync_time: i64,
    pub sync_id: Option<String>,
}

impl SyncMeta {
    /// Metadata for a row that only has local identity so far.
    pub fn local(id: i64, sync_time: i64) -> Self {
        Self {
            id,
            sync_time,
            sync_id: None,
        }
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            sync_time: row.get("sync_time")?,
            sync_id: row.get("sync_id")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artist {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub mbid: Option<String>,
    pub name: String,
    pub name_match: String,
    pub discovery_date: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Album {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub artist_id: i64,
    pub mbid: Option<String>,
    pub name: String,
    pub name_match: String,
    pub discovery_date: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Song {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub artist_id: i64,
    pub album_id: i64,
    pub mbid: Option<String>,
    /// Local path, clients fetch the content through `/songs/{id}`.
    #[serde(skip_serializing)]
    pub filename: String,
    pub mime_type: String,
    /// Modification time of the file in milliseconds since the epoch.
    pub mtime: i64,
    /// Kilobits per second.
    pub bitrate: Option<i64>,
    pub filesize: i64,
    /// Seconds.
    pub length: Option<i64>,
    pub title: String,
    pub track: Option<i64>,
    #[serde(skip_serializing)]
    pub mark: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Playlist {
    #[serde(flatten)]
    pub meta: SyncMeta,
    #[serde(skip_serializing)]
    pub filename: String,
    pub name: String,
    pub created_date: Option<i64>,
    #[serde(skip_serializing)]
    pub mark: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistEntry {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub playlist_id: i64,
    pub position: i64,
    pub song_id: i64,
}

/// A stored copy of an entity's artwork.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// A decoded row of any kind, as sent to feed clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Artist(Artist),
    Album(Album),
    Song(Song),
    Playlist(Playlist),
    PlaylistEntry(PlaylistEntry),
}

impl Record {
    pub fn meta(&self) -> &SyncMeta {
        match self {
            Record::Artist(x) => &x.meta,
            Record::Album(x) => &x.meta,
            Record::Song(x) => &x.meta,
            Record::Playlist(x) => &x.meta,
            Record::PlaylistEntry(x) => &x.meta,
        }
    }
}

/// Conversion between an entity and its generic row form.
pub trait SyncEntity: Sized {
    const KIND: EntityKind;

    fn meta(&self) -> &SyncMeta;

    /// Domain attribute values, in table column order.
    fn domain_values(&self) -> Vec<Value>;

    fn from_row(row: &Row) -> rusqlite::Result<Self>;

    fn into_record(self) -> Record;

    fn to_sync_row(&self) -> SyncRow {
        let meta = self.meta();
        SyncRow {
            id: meta.id,
            sync_time: meta.sync_time,
            sync_id: meta.sync_id.clone(),
            values: self.domain_values(),
        }
    }
}

impl SyncEntity for Artist {
    const KIND: EntityKind = EntityKind::Artist;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn domain_values(&self) -> Vec<Value> {
        vec![
            self.mbid.clone().into(),
            self.name.clone().into(),
            self.name_match.clone().into(),
            self.discovery_date.into(),
        ]
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Artist {
            meta: SyncMeta::from_row(row)?,
            mbid: row.get("mbid")?,
            name: row.get("name")?,
            name_match: row.get("name_match")?,
            discovery_date: row.get("discovery_date")?,
        })
    }

    fn into_record(self) -> Record {
        Record::Artist(self)
    }
}

impl SyncEntity for Album {
    const KIND: EntityKind = EntityKind::Album;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn domain_values(&self) -> Vec<Value> {
        vec![
            self.artist_id.into(),
            self.mbid.clone().into(),
            self.name.clone().into(),
            self.name_match.clone().into(),
            self.discovery_date.into(),
        ]
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Album {
            meta: SyncMeta::from_row(row)?,
            artist_id: row.get("artist_id")?,
            mbid: row.get("mbid")?,
            name: row.get("name")?,
            name_match: row.get("name_match")?,
            discovery_date: row.get("discovery_date")?,
        })
    }

    fn into_record(self) -> Record {
        Record::Album(self)
    }
}

impl SyncEntity for Song {
    const KIND: EntityKind = EntityKind::Song;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn domain_values(&self) -> Vec<Value> {
        vec![
            self.artist_id.into(),
            self.album_id.into(),
            self.mbid.clone().into(),
            self.filename.clone().into(),
            self.mime_type.clone().into(),
            self.mtime.into(),
            self.bitrate.into(),
            self.filesize.into(),
            self.length.into(),
            self.title.clone().into(),
            self.track.into(),
            self.mark.into(),
        ]
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Song {
            meta: SyncMeta::from_row(row)?,
            artist_id: row.get("artist_id")?,
            album_id: row.get("album_id")?,
            mbid: row.get("mbid")?,
            filename: row.get("filename")?,
            mime_type: row.get("mime_type")?,
            mtime: row.get("mtime")?,
            bitrate: row.get("bitrate")?,
            filesize: row.get("filesize")?,
            length: row.get("length")?,
            title: row.get("title")?,
            track: row.get("track")?,
            mark: row.get("mark")?,
        })
    }

    fn into_record(self) -> Record {
        Record::Song(self)
    }
}

impl SyncEntity for Playlist {
    const KIND: EntityKind = EntityKind::Playlist;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn domain_values(&self) -> Vec<Value> {
        vec![
            self.filename.clone().into(),
            self.name.clone().into(),
            self.created_date.into(),
            self.mark.into(),
        ]
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Playlist {
            meta: SyncMeta::from_row(row)?,
            filename: row.get("filename")?,
            name: row.get("name")?,
            created_date: row.get("created_date")?,
            mark: row.get("mark")?,
        })
    }

    fn into_record(self) -> Record {
        Record::Playlist(self)
    }
}

impl SyncEntity for PlaylistEntry {
    const KIND: EntityKind = EntityKind::PlaylistEntry;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn domain_values(&self) -> Vec<Value> {
        vec![
            self.playlist_id.into(),
            self.position.into(),
            self.song_id.into(),
        ]
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PlaylistEntry {
            meta: SyncMeta::from_row(row)?,
            playlist_id: row.get("playlist_id")?,
            position: row.get("position")?,
            song_id: row.get("song_id")?,
        })
    }

    fn into_record(self) -> Record {
        Record::PlaylistEntry(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_names_roundtrip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_feed_name(kind.feed_name()), Some(kind));
        }
        assert_eq!(EntityKind::from_feed_name("tracks"), None);
    }

    #[test]
    fn song_record_hides_local_fields() {
        let song = Song {
            meta: SyncMeta {
                id: 7,
                sync_time: 1000,
                sync_id: Some("7".to_string()),
            },
            artist_id: 1,
            album_id: 2,
            mbid: None,
            filename: "/music/secret/path.mp3".to_string(),
            mime_type: "audio/mpeg".to_string(),
            mtime: 5,
            bitrate: Some(192),
            filesize: 1234,
            length: Some(180),
            title: "Help!".to_string(),
            track: Some(1),
            mark: true,
        };

        let json = serde_json::to_value(song.into_record()).unwrap();
        assert_eq!(json["type"], "song");
        assert_eq!(json["id"], 7);
        assert_eq!(json["sync_id"], "7");
        assert_eq!(json["title"], "Help!");
        assert!(json.get("filename").is_none());
        assert!(json.get("mark").is_none());
    }
}
