//! SQLite schema definitions for the library catalog.
//!
//! Syncable tables start with `id`, `sync_time` and `sync_id`, followed by
//! their domain columns. Each syncable table has a tombstone table
//! `<table>_deleted (id, sync_time)`.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Syncable Tables
// =============================================================================

pub const ARTISTS_TABLE: Table = Table {
    name: "artists",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("sync_time", &SqlType::Integer, non_null = true),
        sqlite_column!("sync_id", &SqlType::Text),
        sqlite_column!("mbid", &SqlType::Text),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("name_match", &SqlType::Text, non_null = true),
        sqlite_column!("discovery_date", &SqlType::Integer),
    ],
    indices: &[
        ("idx_artists_sync_id", "sync_id"),
        ("idx_artists_sync_time", "sync_time"),
    ],
    unique_constraints: &[&["name_match"]],
};

pub const ALBUMS_TABLE: Table = Table {
    name: "albums",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("sync_time", &SqlType::Integer, non_null = true),
        sqlite_column!("sync_id", &SqlType::Text),
        sqlite_column!("artist_id", &SqlType::Integer, non_null = true),
        sqlite_column!("mbid", &SqlType::Text),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("name_match", &SqlType::Text, non_null = true),
        sqlite_column!("discovery_date", &SqlType::Integer),
    ],
    indices: &[
        ("idx_albums_sync_id", "sync_id"),
        ("idx_albums_sync_time", "sync_time"),
    ],
    unique_constraints: &[&["artist_id", "name_match"]],
};

pub const SONGS_TABLE: Table = Table {
    name: "songs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("sync_time", &SqlType::Integer, non_null = true),
        sqlite_column!("sync_id", &SqlType::Text),
        sqlite_column!("artist_id", &SqlType::Integer, non_null = true),
        sqlite_column!("album_id", &SqlType::Integer, non_null = true),
        sqlite_column!("mbid", &SqlType::Text),
        sqlite_column!("filename", &SqlType::Text, non_null = true),
        sqlite_column!("mime_type", &SqlType::Text, non_null = true),
        sqlite_column!("mtime", &SqlType::Integer, non_null = true),
        sqlite_column!("bitrate", &SqlType::Integer),
        sqlite_column!("filesize", &SqlType::Integer, non_null = true),
        sqlite_column!("length", &SqlType::Integer),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("track", &SqlType::Integer),
        sqlite_column!(
            "mark",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[
        ("idx_songs_sync_id", "sync_id"),
        ("idx_songs_sync_time", "sync_time"),
        ("idx_songs_mark", "mark"),
    ],
    unique_constraints: &[&["filename"]],
};

pub const PLAYLISTS_TABLE: Table = Table {
    name: "playlists",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("sync_time", &SqlType::Integer, non_null = true),
        sqlite_column!("sync_id", &SqlType::Text),
        sqlite_column!("filename", &SqlType::Text, non_null = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("created_date", &SqlType::Integer),
        sqlite_column!(
            "mark",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[
        ("idx_playlists_sync_id", "sync_id"),
        ("idx_playlists_sync_time", "sync_time"),
    ],
    unique_constraints: &[&["filename"]],
};

pub const PLAYLIST_SONGS_TABLE: Table = Table {
    name: "playlist_songs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("sync_time", &SqlType::Integer, non_null = true),
        sqlite_column!("sync_id", &SqlType::Text),
        sqlite_column!("playlist_id", &SqlType::Integer, non_null = true),
        sqlite_column!("position", &SqlType::Integer, non_null = true),
        sqlite_column!("song_id", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_playlist_songs_sync_id", "sync_id"),
        ("idx_playlist_songs_sync_time", "sync_time"),
        ("idx_playlist_songs_song", "song_id"),
    ],
    unique_constraints: &[&["playlist_id", "position", "song_id"]],
};

// =============================================================================
// Tombstone Tables
// =============================================================================

macro_rules! tombstone_table {
    ($name:expr, $index:expr) => {
        Table {
            name: $name,
            columns: &[
                sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
                sqlite_column!("sync_time", &SqlType::Integer, non_null = true),
            ],
            indices: &[($index, "sync_time")],
            unique_constraints: &[],
        }
    };
}

pub const ARTISTS_DELETED_TABLE: Table =
    tombstone_table!("artists_deleted", "idx_artists_deleted_sync_time");
pub const ALBUMS_DELETED_TABLE: Table =
    tombstone_table!("albums_deleted", "idx_albums_deleted_sync_time");
pub const SONGS_DELETED_TABLE: Table =
    tombstone_table!("songs_deleted", "idx_songs_deleted_sync_time");
pub const PLAYLISTS_DELETED_TABLE: Table =
    tombstone_table!("playlists_deleted", "idx_playlists_deleted_sync_time");
pub const PLAYLIST_SONGS_DELETED_TABLE: Table = tombstone_table!(
    "playlist_songs_deleted",
    "idx_playlist_songs_deleted_sync_time"
);

// =============================================================================
// Local-only Tables
// =============================================================================

/// Artwork, keyed by owning table and id. Not synced.
pub const IMAGES_TABLE: Table = Table {
    name: "images",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("entity_table", &SqlType::Text, non_null = true),
        sqlite_column!("entity_id", &SqlType::Integer, non_null = true),
        sqlite_column!("width", &SqlType::Integer, non_null = true),
        sqlite_column!("height", &SqlType::Integer, non_null = true),
        sqlite_column!("data", &SqlType::Blob, non_null = true),
    ],
    indices: &[("idx_images_entity", "entity_table, entity_id")],
    unique_constraints: &[&["entity_table", "entity_id", "width", "height"]],
};

/// Next id to hand out per table, so ids can be reserved before a row exists.
pub const ID_SEQUENCES_TABLE: Table = Table {
    name: "id_sequences",
    columns: &[
        sqlite_column!("table_name", &SqlType::Text, is_primary_key = true),
        sqlite_column!("next_id", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

// =============================================================================
// Versioned Schemas
// =============================================================================

pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        ARTISTS_TABLE,
        ARTISTS_DELETED_TABLE,
        ALBUMS_TABLE,
        ALBUMS_DELETED_TABLE,
        SONGS_TABLE,
        SONGS_DELETED_TABLE,
        PLAYLISTS_TABLE,
        PLAYLISTS_DELETED_TABLE,
        PLAYLIST_SONGS_TABLE,
        PLAYLIST_SONGS_DELETED_TABLE,
        IMAGES_TABLE,
        ID_SEQUENCES_TABLE,
    ],
    migration: None,
}];

/// Syncable tables only, for staging databases.
pub const STAGING_SCHEMA: VersionedSchema = VersionedSchema {
    version: 0,
    tables: &[
        ARTISTS_TABLE,
        ARTISTS_DELETED_TABLE,
        ALBUMS_TABLE,
        ALBUMS_DELETED_TABLE,
        SONGS_TABLE,
        SONGS_DELETED_TABLE,
        PLAYLISTS_TABLE,
        PLAYLISTS_DELETED_TABLE,
        PLAYLIST_SONGS_TABLE,
        PLAYLIST_SONGS_DELETED_TABLE,
    ],
    migration: None,
};

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn catalog_schema_creates_and_validates() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = CATALOG_VERSIONED_SCHEMAS.last().unwrap();
        schema.create(&conn).unwrap();
        schema.validate(&conn).unwrap();
    }

    #[test]
    fn staging_schema_is_a_subset_of_the_catalog() {
        let catalog = CATALOG_VERSIONED_SCHEMAS.last().unwrap();
        for table in STAGING_SCHEMA.tables {
            assert!(
                catalog.tables.iter().any(|t| t.name == table.name),
                "{} missing from catalog schema",
                table.name
            );
        }
    }

    #[test]
    fn syncable_tables_start_with_sync_columns() {
        for table in [
            &ARTISTS_TABLE,
            &ALBUMS_TABLE,
            &SONGS_TABLE,
            &PLAYLISTS_TABLE,
            &PLAYLIST_SONGS_TABLE,
        ] {
            let names: Vec<_> = table.column_names().take(3).collect();
            assert_eq!(names, vec!["id", "sync_time", "sync_id"], "{}", table.name);
        }
    }

    #[test]
    fn name_match_is_unique_per_artist() {
        let conn = Connection::open_in_memory().unwrap();
        STAGING_SCHEMA.create_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO artists (id, sync_time, name, name_match) VALUES (1, 1, 'The Beatles', 'Beatles')",
            [],
        )
        .unwrap();
        let duplicate = conn.execute(
            "INSERT INTO artists (id, sync_time, name, name_match) VALUES (2, 1, 'Beatles', 'Beatles')",
            [],
        );
        assert!(duplicate.is_err());
    }
}
