//! In-memory staging databases.
//!
//! A staging store has the syncable tables of the catalog and holds one
//! batch of changes: a scan batch waiting to be merged, or a feed
//! snapshot being serialized.

use anyhow::Result;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::models::{EntityKind, Record, SyncEntity};
use super::schema::STAGING_SCHEMA;
use crate::sync::{SyncRow, SyncTable};

/// Where staged rows come from, which decides the ids they get when merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingOrigin {
    /// Rows were staged by this server with ids reserved in the catalog.
    Local,
    /// Rows came from another replica, their ids mean nothing here.
    Remote,
}

pub struct StagingStore {
    conn: Connection,
    origin: StagingOrigin,
}

impl StagingStore {
    pub fn new(origin: StagingOrigin) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        STAGING_SCHEMA.create_tables(&conn)?;
        Ok(Self { conn, origin })
    }

    pub fn origin(&self) -> StagingOrigin {
        self.origin
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Stages an entity, replacing any staged row with the same id.
    pub fn stage<E: SyncEntity>(&self, entity: &E) -> Result<()> {
        self.insert_row(E::KIND, &entity.to_sync_row())
    }

    pub fn insert_row(&self, kind: EntityKind, row: &SyncRow) -> Result<()> {
        let table = SyncTable::for_kind(kind);
        self.conn.execute(
            &table.insert_sql(true),
            params_from_iter(row.column_values(row.id, row.sync_time, row.sync_id.as_deref())),
        )?;
        Ok(())
    }

    pub fn stage_tombstone(&self, kind: EntityKind, id: i64, sync_time: i64) -> Result<()> {
        let table = SyncTable::for_kind(kind);
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (id, sync_time) VALUES (?1, ?2)",
                table.tombstones.name
            ),
            params![id, sync_time],
        )?;
        Ok(())
    }

    /// Returns false when no such row is staged.
    pub fn set_mbid(&self, kind: EntityKind, id: i64, mbid: &str) -> Result<bool> {
        let updated = self.conn.execute(
            &format!("UPDATE {} SET mbid = ?1 WHERE id = ?2", kind.feed_name()),
            params![mbid, id],
        )?;
        Ok(updated > 0)
    }

    pub(crate) fn record_assigned_sync_ids(
        &self,
        kind: EntityKind,
        assigned: &[(i64, String)],
    ) -> Result<()> {
        let mut stmt = self.conn.prepare(&format!(
            "UPDATE {} SET sync_id = ?1 WHERE id = ?2",
            kind.feed_name()
        ))?;
        for (id, sync_id) in assigned {
            stmt.execute(params![sync_id, id])?;
        }
        Ok(())
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn contains(&self, kind: EntityKind, id: i64) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id = ?1", kind.feed_name()),
                [id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get<E: SyncEntity>(&self, id: i64) -> Result<Option<E>> {
        let table = SyncTable::for_kind(E::KIND);
        let entity = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE id = ?1",
                    table.select_list(),
                    table.name()
                ),
                [id],
                E::from_row,
            )
            .optional()?;
        Ok(entity)
    }

    pub fn find_artist_id(&self, name_match: &str) -> Result<Option<i64>> {
        self.find_id("SELECT id FROM artists WHERE name_match = ?1", params![name_match])
    }

    pub fn find_album_id(&self, artist_id: i64, name_match: &str) -> Result<Option<i64>> {
        self.find_id(
            "SELECT id FROM albums WHERE artist_id = ?1 AND name_match = ?2",
            params![artist_id, name_match],
        )
    }

    fn find_id(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<i64>> {
        Ok(self.conn.query_row(sql, params, |r| r.get(0)).optional()?)
    }

    // =========================================================================
    // Counts and iteration
    // =========================================================================

    pub fn count(&self, kind: EntityKind) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.feed_name()),
            [],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn tombstone_count(&self, kind: EntityKind) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {}",
                SyncTable::for_kind(kind).tombstones.name
            ),
            [],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        for kind in EntityKind::ALL {
            if self.count(kind)? > 0 || self.tombstone_count(kind)? > 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Largest `sync_time` over the rows and tombstones of `kind`.
    pub fn max_sync_time(&self, kind: EntityKind) -> Result<Option<i64>> {
        let table = SyncTable::for_kind(kind);
        let max = self.conn.query_row(
            &format!(
                "SELECT MAX(t) FROM (SELECT MAX(sync_time) AS t FROM {} UNION ALL SELECT MAX(sync_time) FROM {})",
                table.name(),
                table.tombstones.name
            ),
            [],
            |r| r.get(0),
        )?;
        Ok(max)
    }

    pub fn tombstone_ids(&self, kind: EntityKind) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM {} ORDER BY id",
            SyncTable::for_kind(kind).tombstones.name
        ))?;
        let ids = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Calls `f` with every staged record of `kind`, in id order.
    pub fn for_each_record<F>(&self, kind: EntityKind, mut f: F) -> Result<()>
    where
        F: FnMut(Record) -> Result<()>,
    {
        let table = SyncTable::for_kind(kind);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY id",
            table.select_list(),
            table.name()
        ))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            f((table.decode)(row)?)?;
        }
        Ok(())
    }
}
