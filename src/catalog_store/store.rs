//! SQLite-backed catalog store.
//!
//! One connection behind a mutex serves every caller, so each trait method
//! runs atomically. The store also owns the sync clock: every write stamps
//! rows with a time taken while the connection is held, which keeps stamps
//! in commit order.

use super::models::*;
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::staging::StagingStore;
use super::trait_def::{CatalogStore, SweepReport};
use crate::sqlite_persistence::BASE_DB_VERSION;
use crate::sync::{delete_with_tombstone, ChangeCounts, MergeEngine, MergeReport, SyncTable};
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Params};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

fn migrate_if_needed(conn: &mut Connection) -> Result<()> {
    let db_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    let latest_version = CATALOG_VERSIONED_SCHEMAS.len() - 1;
    let latest_schema = &CATALOG_VERSIONED_SCHEMAS[latest_version];

    let table_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |r| r.get(0),
    )?;

    if table_count == 0 {
        info!("Creating catalog db schema at version {}", latest_version);
        latest_schema.create(conn)?;
        return Ok(());
    }

    if db_version < BASE_DB_VERSION as i64 {
        bail!(
            "Catalog db has user_version {}, which is not a library catalog",
            db_version
        );
    }
    let mut current_version = (db_version - BASE_DB_VERSION as i64) as usize;
    if current_version > latest_version {
        bail!(
            "Catalog db version {} is newer than the supported version {}",
            current_version,
            latest_version
        );
    }

    if current_version < latest_version {
        let tx = conn.transaction()?;
        for schema in CATALOG_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!(
                    "Migrating catalog db from version {} to {}",
                    current_version, schema.version
                );
                migration_fn(&tx)?;
            }
            current_version = schema.version;
        }
        tx.pragma_update(None, "user_version", BASE_DB_VERSION + current_version)?;
        tx.commit()?;
    }

    latest_schema.validate(conn)?;
    Ok(())
}

/// Reserves the next id of `kind` on `conn`.
///
/// The sequence starts past every id present in the table or its tombstones.
pub(crate) fn reserve_id(conn: &Connection, kind: EntityKind) -> Result<i64> {
    let table = SyncTable::for_kind(kind);
    conn.execute(
        &format!(
            "INSERT OR IGNORE INTO id_sequences (table_name, next_id)
             SELECT ?1, MAX(COALESCE((SELECT MAX(id) FROM {}), 0), COALESCE((SELECT MAX(id) FROM {}), 0)) + 1",
            table.name(),
            table.tombstones.name
        ),
        [table.name()],
    )?;
    let id: i64 = conn.query_row(
        "SELECT next_id FROM id_sequences WHERE table_name = ?1",
        [table.name()],
        |r| r.get(0),
    )?;
    conn.execute(
        "UPDATE id_sequences SET next_id = next_id + 1 WHERE table_name = ?1",
        [table.name()],
    )?;
    Ok(id)
}

fn max_stored_sync_time(conn: &Connection) -> Result<i64> {
    let mut max = 0;
    for kind in EntityKind::ALL {
        let table = SyncTable::for_kind(kind);
        for name in [table.name(), table.tombstones.name] {
            let table_max: Option<i64> = conn.query_row(
                &format!("SELECT MAX(sync_time) FROM {}", name),
                [],
                |r| r.get(0),
            )?;
            max = max.max(table_max.unwrap_or(0));
        }
    }
    Ok(max)
}

/// SQLite-backed catalog store.
#[derive(Clone)]
pub struct SqliteCatalogStore {
    conn: Arc<Mutex<Connection>>,
    merge_engine: MergeEngine,
    last_sync_time: Arc<AtomicI64>,
}

impl SqliteCatalogStore {
    /// Opens or creates the catalog database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let mut conn = Connection::open_with_flags(
            db_path.as_ref(),
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open catalog database")?;

        migrate_if_needed(&mut conn)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let last_sync_time = max_stored_sync_time(&conn)?;
        let count = |table: &str| -> i64 {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
                .unwrap_or(0)
        };
        info!(
            "Opened catalog: {} artists, {} albums, {} songs, {} playlists",
            count("artists"),
            count("albums"),
            count("songs"),
            count("playlists")
        );

        Ok(SqliteCatalogStore {
            conn: Arc::new(Mutex::new(conn)),
            merge_engine: MergeEngine::new(),
            last_sync_time: Arc::new(AtomicI64::new(last_sync_time)),
        })
    }

    fn query_entity<E: SyncEntity, P: Params>(
        conn: &Connection,
        where_clause: &str,
        params: P,
    ) -> Result<Option<E>> {
        let table = SyncTable::for_kind(E::KIND);
        let entity = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {}",
                    table.select_list(),
                    table.name(),
                    where_clause
                ),
                params,
                E::from_row,
            )
            .optional()?;
        Ok(entity)
    }

    fn marked_ids(conn: &Connection, table: &str) -> Result<Vec<i64>> {
        let mut stmt = conn.prepare(&format!("SELECT id FROM {} WHERE mark = 1", table))?;
        let ids = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }
}

impl CatalogStore for SqliteCatalogStore {
    // =========================================================================
    // Sync Clock and Identity
    // =========================================================================

    fn next_sync_time(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = self
            .last_sync_time
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    fn reserve_id(&self, kind: EntityKind) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        reserve_id(&conn, kind)
    }

    // =========================================================================
    // Scanner Support
    // =========================================================================

    fn mark_all_stale(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("UPDATE songs SET mark = 1; UPDATE playlists SET mark = 1;")?;
        Ok(())
    }

    fn find_song_by_filename(&self, filename: &str) -> Result<Option<Song>> {
        let conn = self.conn.lock().unwrap();
        Self::query_entity(&conn, "filename = ?1", [filename])
    }

    fn clear_song_mark(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE songs SET mark = 0 WHERE id = ?1", [id])?;
        Ok(())
    }

    fn find_artist_by_name_match(&self, name_match: &str) -> Result<Option<Artist>> {
        let conn = self.conn.lock().unwrap();
        Self::query_entity(&conn, "name_match = ?1", [name_match])
    }

    fn find_album_by_name_match(
        &self,
        artist_id: i64,
        name_match: &str,
    ) -> Result<Option<Album>> {
        let conn = self.conn.lock().unwrap();
        Self::query_entity(
            &conn,
            "artist_id = ?1 AND name_match = ?2",
            params![artist_id, name_match],
        )
    }

    fn find_playlist_by_filename(&self, filename: &str) -> Result<Option<Playlist>> {
        let conn = self.conn.lock().unwrap();
        Self::query_entity(&conn, "filename = ?1", [filename])
    }

    fn clear_playlist_mark(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE playlists SET mark = 0 WHERE id = ?1", [id])?;
        Ok(())
    }

    fn get_playlist_entries(&self, playlist_id: i64) -> Result<Vec<PlaylistEntry>> {
        let conn = self.conn.lock().unwrap();
        let table = SyncTable::for_kind(EntityKind::PlaylistEntry);
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM playlist_songs WHERE playlist_id = ?1 ORDER BY position, id",
            table.select_list()
        ))?;
        let entries = stmt
            .query_map([playlist_id], PlaylistEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn commit_staging(&self, staging: &StagingStore) -> Result<MergeReport> {
        let mut conn = self.conn.lock().unwrap();
        let commit_time = self.next_sync_time();
        let report = self
            .merge_engine
            .merge_batch(&mut conn, staging, commit_time)?;
        debug!("Committed staging batch at {}: {:?}", commit_time, report);
        Ok(report)
    }

    fn sweep_stale(&self) -> Result<SweepReport> {
        let mut conn = self.conn.lock().unwrap();
        let sync_time = self.next_sync_time();
        let tx = conn.transaction()?;

        let songs = Self::marked_ids(&tx, "songs")?;
        let playlists = Self::marked_ids(&tx, "playlists")?;

        let mut entry_ids = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT id FROM playlist_songs
                 WHERE song_id IN (SELECT id FROM songs WHERE mark = 1)
                    OR playlist_id IN (SELECT id FROM playlists WHERE mark = 1)",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                entry_ids.push(row.get::<_, i64>(0)?);
            }
        }

        let mut report = SweepReport::default();
        let entries_table = SyncTable::for_kind(EntityKind::PlaylistEntry);
        for id in entry_ids {
            if delete_with_tombstone(&tx, entries_table, id, sync_time)? {
                report.playlist_entries += 1;
            }
        }
        let songs_table = SyncTable::for_kind(EntityKind::Song);
        for id in songs {
            if delete_with_tombstone(&tx, songs_table, id, sync_time)? {
                report.songs += 1;
            }
        }
        let playlists_table = SyncTable::for_kind(EntityKind::Playlist);
        for id in playlists {
            if delete_with_tombstone(&tx, playlists_table, id, sync_time)? {
                report.playlists += 1;
            }
        }

        tx.commit()?;
        Ok(report)
    }

    // =========================================================================
    // Enrichment
    // =========================================================================

    fn set_mbid(&self, kind: EntityKind, id: i64, mbid: &str) -> Result<bool> {
        if !SyncTable::for_kind(kind).table.has_column("mbid") {
            bail!("{} have no mbid", kind);
        }
        let conn = self.conn.lock().unwrap();
        let sync_time = self.next_sync_time();
        let updated = conn.execute(
            &format!(
                "UPDATE {} SET mbid = ?1, sync_time = ?2 WHERE id = ?3",
                kind.feed_name()
            ),
            params![mbid, sync_time, id],
        )?;
        Ok(updated > 0)
    }

    fn replace_images(&self, kind: EntityKind, id: i64, images: &[ImageData]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM images WHERE entity_table = ?1 AND entity_id = ?2",
            params![kind.feed_name(), id],
        )?;
        for image in images {
            tx.execute(
                "INSERT INTO images (entity_table, entity_id, width, height, data) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![kind.feed_name(), id, image.width, image.height, image.data],
            )?;
        }
        let sync_time = self.next_sync_time();
        tx.execute(
            &format!("UPDATE {} SET sync_time = ?1 WHERE id = ?2", kind.feed_name()),
            params![sync_time, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn put_image(
        &self,
        kind: EntityKind,
        id: i64,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO images (entity_table, entity_id, width, height, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![kind.feed_name(), id, width, height, data],
        )?;
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn get_song(&self, id: i64) -> Result<Option<Song>> {
        let conn = self.conn.lock().unwrap();
        Self::query_entity(&conn, "id = ?1", [id])
    }

    fn get_record(&self, kind: EntityKind, id: i64) -> Result<Option<Record>> {
        let conn = self.conn.lock().unwrap();
        let table = SyncTable::for_kind(kind);
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE id = ?1",
                    table.select_list(),
                    table.name()
                ),
                [id],
                |row| (table.decode)(row),
            )
            .optional()?;
        Ok(record)
    }

    fn get_image(
        &self,
        kind: EntityKind,
        id: i64,
        width: u32,
        height: u32,
    ) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        let data = conn
            .query_row(
                "SELECT data FROM images WHERE entity_table = ?1 AND entity_id = ?2 AND width = ?3 AND height = ?4",
                params![kind.feed_name(), id, width, height],
                |r| r.get(0),
            )
            .optional()?;
        Ok(data)
    }

    fn get_largest_image(&self, kind: EntityKind, id: i64) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        let data = conn
            .query_row(
                "SELECT data FROM images WHERE entity_table = ?1 AND entity_id = ?2
                 ORDER BY width * height DESC LIMIT 1",
                params![kind.feed_name(), id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(data)
    }

    fn count(&self, kind: EntityKind) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.feed_name()),
            [],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    fn tombstone_count(&self, kind: EntityKind) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {}",
                SyncTable::for_kind(kind).tombstones.name
            ),
            [],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    // =========================================================================
    // Feeds
    // =========================================================================

    fn find_local_changes(
        &self,
        kind: EntityKind,
        since: i64,
        out: &StagingStore,
    ) -> Result<ChangeCounts> {
        let conn = self.conn.lock().unwrap();
        self.merge_engine.find_local_changes(&conn, kind, since, out)
    }
}
