//! Sorted merge-join reconciliation between a staging store and the catalog.
//!
//! Staged rows and catalog rows are both walked in ascending `sync_id` order.
//! A staged row whose `sync_id` lines up with a catalog row updates it in
//! place; every other staged row is inserted. The staged side always wins.

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::ops::AddAssign;
use tracing::{debug, warn};

use super::row::{Lookahead, RowCursor, SqliteRowCursor, SyncRow, VecCursor};
use super::table::SyncTable;
use crate::catalog_store::{reserve_id, EntityKind, StagingOrigin, StagingStore};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub inserted: usize,
    pub updated: usize,
    /// Aligned rows whose values already matched.
    pub unchanged: usize,
    /// Updates applied over a catalog row newer than the staged one.
    pub conflicts: usize,
    pub deleted: usize,
}

impl MergeReport {
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

impl AddAssign for MergeReport {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.conflicts += other.conflicts;
        self.deleted += other.deleted;
    }
}

/// Rows and tombstones copied by `find_local_changes`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChangeCounts {
    pub modified: usize,
    pub deleted: usize,
}

/// Sync ids assigned to staged rows that had none, keyed by staged id.
type AssignedSyncIds = Vec<(i64, String)>;

#[derive(Debug, Default, Clone, Copy)]
pub struct MergeEngine;

impl MergeEngine {
    pub fn new() -> Self {
        Self
    }

    /// Merges one table of `staging` into `catalog` inside its own transaction.
    pub fn merge_table(
        &self,
        catalog: &mut Connection,
        staging: &StagingStore,
        kind: EntityKind,
        commit_time: i64,
    ) -> Result<MergeReport> {
        let tx = catalog.transaction()?;
        let (report, assigned) = self
            .merge_in(&tx, staging, kind, commit_time)
            .with_context(|| format!("Failed to merge {}", kind))?;
        tx.commit()?;
        staging.record_assigned_sync_ids(kind, &assigned)?;
        Ok(report)
    }

    /// Merges every table of `staging`, referenced kinds first, as one transaction.
    pub fn merge_batch(
        &self,
        catalog: &mut Connection,
        staging: &StagingStore,
        commit_time: i64,
    ) -> Result<MergeReport> {
        let tx = catalog.transaction()?;
        let mut total = MergeReport::default();
        let mut assigned_by_kind = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            let (report, assigned) = self
                .merge_in(&tx, staging, kind, commit_time)
                .with_context(|| format!("Failed to merge {}", kind))?;
            debug!("Merged {}: {:?}", kind, report);
            total += report;
            assigned_by_kind.push((kind, assigned));
        }
        tx.commit()?;

        for (kind, assigned) in assigned_by_kind {
            staging.record_assigned_sync_ids(kind, &assigned)?;
        }
        Ok(total)
    }

    fn merge_in(
        &self,
        conn: &Connection,
        staging: &StagingStore,
        kind: EntityKind,
        commit_time: i64,
    ) -> Result<(MergeReport, AssignedSyncIds)> {
        let table = SyncTable::for_kind(kind);
        let mut report = MergeReport::default();
        let mut assigned = Vec::new();

        // Tombstones go first so removed rows release their unique keys
        for id in staging.tombstone_ids(kind)? {
            let local_id = match staging.origin() {
                StagingOrigin::Local => Some(id),
                StagingOrigin::Remote => find_by_sync_id(conn, table, &id.to_string())?,
            };
            let Some(local_id) = local_id else {
                debug!("No {} row for remote tombstone {}", kind, id);
                continue;
            };
            if delete_with_tombstone(conn, table, local_id, commit_time)? {
                report.deleted += 1;
            }
        }

        // Only the keys are loaded on the catalog side, inserts below must not
        // show up in the cursor.
        let mut stmt = conn.prepare(&format!(
            "SELECT id, sync_time, sync_id FROM {} WHERE sync_id IS NOT NULL ORDER BY sync_id",
            table.name()
        ))?;
        let catalog_keys = stmt
            .query_map([], |r| {
                Ok(SyncRow {
                    id: r.get(0)?,
                    sync_time: r.get(1)?,
                    sync_id: r.get(2)?,
                    values: Vec::new(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut catalog_cursor = Lookahead::new(VecCursor::new(catalog_keys))?;

        let mut staged_stmt = staging.connection().prepare(&format!(
            "SELECT {} FROM {} ORDER BY sync_id, id",
            table.select_list(),
            table.name()
        ))?;
        let mut staged_cursor =
            SqliteRowCursor::new(staged_stmt.query([])?, table.domain_width());

        while let Some(staged) = staged_cursor.next_row()? {
            let aligned = match staged.sync_id.as_deref() {
                None => None,
                Some(key) => {
                    while catalog_cursor
                        .peek()
                        .and_then(|c| c.sync_id.as_deref())
                        .is_some_and(|c| c < key)
                    {
                        catalog_cursor.advance()?;
                    }
                    let lines_up =
                        catalog_cursor.peek().and_then(|c| c.sync_id.as_deref()) == Some(key);
                    if lines_up {
                        catalog_cursor.advance()?
                    } else {
                        None
                    }
                }
            };

            match aligned {
                Some(current) => {
                    self.update(conn, table, &current, &staged, commit_time, &mut report)?
                }
                None => {
                    let sync_id = self.insert(conn, table, staging.origin(), &staged, commit_time)?;
                    if staged.sync_id.is_none() {
                        assigned.push((staged.id, sync_id));
                    }
                    report.inserted += 1;
                }
            }
        }

        Ok((report, assigned))
    }

    fn insert(
        &self,
        conn: &Connection,
        table: &SyncTable,
        origin: StagingOrigin,
        staged: &SyncRow,
        commit_time: i64,
    ) -> Result<String> {
        let id = match origin {
            StagingOrigin::Local => staged.id,
            StagingOrigin::Remote => reserve_id(conn, table.kind)?,
        };
        let sync_id = staged.sync_id.clone().unwrap_or_else(|| id.to_string());
        conn.execute(
            &table.insert_sql(false),
            params_from_iter(staged.column_values(id, commit_time, Some(&sync_id))),
        )?;
        Ok(sync_id)
    }

    fn update(
        &self,
        conn: &Connection,
        table: &SyncTable,
        current: &SyncRow,
        staged: &SyncRow,
        commit_time: i64,
        report: &mut MergeReport,
    ) -> Result<()> {
        let width = table.domain_width();
        let current_values: Vec<Value> =
            conn.query_row(&table.select_domain_sql(), [current.id], |r| {
                (0..width).map(|i| r.get::<_, Value>(i)).collect()
            })?;
        if current_values == staged.values {
            report.unchanged += 1;
            return Ok(());
        }

        if current.sync_time > staged.sync_time {
            warn!(
                "{} {} changed in the catalog after it was staged, keeping the staged version",
                table.kind, current.id
            );
            report.conflicts += 1;
        }

        let mut values = Vec::with_capacity(width + 2);
        values.push(Value::Integer(commit_time));
        values.extend(staged.values.iter().cloned());
        values.push(Value::Integer(current.id));
        conn.execute(&table.update_sql(), params_from_iter(values))?;
        report.updated += 1;
        Ok(())
    }

    /// Copies catalog rows and tombstones with `sync_time > since` into `out`.
    pub fn find_local_changes(
        &self,
        catalog: &Connection,
        kind: EntityKind,
        since: i64,
        out: &StagingStore,
    ) -> Result<ChangeCounts> {
        let table = SyncTable::for_kind(kind);
        let mut counts = ChangeCounts::default();
        let out_tx = out.connection().unchecked_transaction()?;

        let mut stmt = catalog.prepare(&format!(
            "SELECT {} FROM {} WHERE sync_time > ?1 ORDER BY id",
            table.select_list(),
            table.name()
        ))?;
        let mut cursor = SqliteRowCursor::new(stmt.query([since])?, table.domain_width());
        while let Some(row) = cursor.next_row()? {
            out.insert_row(kind, &row)?;
            counts.modified += 1;
        }

        let mut stmt = catalog.prepare(&format!(
            "SELECT id, sync_time FROM {} WHERE sync_time > ?1 ORDER BY id",
            table.tombstones.name
        ))?;
        let mut rows = stmt.query([since])?;
        while let Some(row) = rows.next()? {
            out.stage_tombstone(kind, row.get(0)?, row.get(1)?)?;
            counts.deleted += 1;
        }

        out_tx.commit()?;
        Ok(counts)
    }
}

/// Local id of the catalog row with the given replica identity.
fn find_by_sync_id(conn: &Connection, table: &SyncTable, sync_id: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            &format!("SELECT id FROM {} WHERE sync_id = ?1", table.name()),
            [sync_id],
            |r| r.get(0),
        )
        .optional()?)
}

/// Removes a catalog row and records its tombstone. Returns whether a row existed.
pub(crate) fn delete_with_tombstone(
    conn: &Connection,
    table: &SyncTable,
    id: i64,
    sync_time: i64,
) -> Result<bool> {
    let removed = conn.execute(&format!("DELETE FROM {} WHERE id = ?1", table.name()), [id])?;
    if removed > 0 {
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (id, sync_time) VALUES (?1, ?2)",
                table.tombstones.name
            ),
            params![id, sync_time],
        )?;
    }
    Ok(removed > 0)
}
