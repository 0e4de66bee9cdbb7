//! Table descriptors driving the generic merge and extraction code.

use rusqlite::Row;

use crate::catalog_store::schema::*;
use crate::catalog_store::{
    Album, Artist, EntityKind, Playlist, PlaylistEntry, Record, Song, SyncEntity,
};
use crate::sqlite_persistence::{Column, Table};

/// Number of leading sync columns: `id`, `sync_time`, `sync_id`.
const SYNC_COLUMNS: usize = 3;

pub struct SyncTable {
    pub kind: EntityKind,
    pub table: &'static Table,
    pub tombstones: &'static Table,
    pub decode: fn(&Row) -> rusqlite::Result<Record>,
}

fn decode<E: SyncEntity>(row: &Row) -> rusqlite::Result<Record> {
    E::from_row(row).map(E::into_record)
}

static SYNC_TABLES: [SyncTable; 5] = [
    SyncTable {
        kind: EntityKind::Artist,
        table: &ARTISTS_TABLE,
        tombstones: &ARTISTS_DELETED_TABLE,
        decode: decode::<Artist>,
    },
    SyncTable {
        kind: EntityKind::Album,
        table: &ALBUMS_TABLE,
        tombstones: &ALBUMS_DELETED_TABLE,
        decode: decode::<Album>,
    },
    SyncTable {
        kind: EntityKind::Song,
        table: &SONGS_TABLE,
        tombstones: &SONGS_DELETED_TABLE,
        decode: decode::<Song>,
    },
    SyncTable {
        kind: EntityKind::Playlist,
        table: &PLAYLISTS_TABLE,
        tombstones: &PLAYLISTS_DELETED_TABLE,
        decode: decode::<Playlist>,
    },
    SyncTable {
        kind: EntityKind::PlaylistEntry,
        table: &PLAYLIST_SONGS_TABLE,
        tombstones: &PLAYLIST_SONGS_DELETED_TABLE,
        decode: decode::<PlaylistEntry>,
    },
];

impl SyncTable {
    pub fn for_kind(kind: EntityKind) -> &'static SyncTable {
        match kind {
            EntityKind::Artist => &SYNC_TABLES[0],
            EntityKind::Album => &SYNC_TABLES[1],
            EntityKind::Song => &SYNC_TABLES[2],
            EntityKind::Playlist => &SYNC_TABLES[3],
            EntityKind::PlaylistEntry => &SYNC_TABLES[4],
        }
    }

    pub fn name(&self) -> &'static str {
        self.table.name
    }

    pub fn domain_columns(&self) -> &'static [Column<'static>] {
        &self.table.columns[SYNC_COLUMNS..]
    }

    pub fn domain_width(&self) -> usize {
        self.table.columns.len() - SYNC_COLUMNS
    }

    fn domain_list(&self) -> String {
        self.domain_columns()
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `id, sync_time, sync_id, <domain columns>`, the shape read by `SyncRow::read`.
    pub fn select_list(&self) -> String {
        self.table.column_names().collect::<Vec<_>>().join(", ")
    }

    pub fn select_domain_sql(&self) -> String {
        format!("SELECT {} FROM {} WHERE id = ?1", self.domain_list(), self.name())
    }

    pub fn insert_sql(&self, or_replace: bool) -> String {
        let placeholders = (1..=self.table.columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT {}INTO {} ({}) VALUES ({})",
            if or_replace { "OR REPLACE " } else { "" },
            self.name(),
            self.select_list(),
            placeholders
        )
    }

    /// Binds `sync_time` as ?1, the domain values next and the id last.
    pub fn update_sql(&self) -> String {
        let assignments = self
            .domain_columns()
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ?{}", c.name, i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "UPDATE {} SET sync_time = ?1, {} WHERE id = ?{}",
            self.name(),
            assignments,
            self.domain_width() + 2
        )
    }
}
