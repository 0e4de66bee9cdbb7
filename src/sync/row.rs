//! Generic rows and forward-only cursors over them.

use anyhow::Result;
use rusqlite::types::Value;
use rusqlite::{Row, Rows};

/// A syncable row with its domain values kept as untyped SQL values.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRow {
    pub id: i64,
    pub sync_time: i64,
    pub sync_id: Option<String>,
    pub values: Vec<Value>,
}

impl SyncRow {
    /// Reads a row selected as `id, sync_time, sync_id, <domain columns>`.
    pub fn read(row: &Row, domain_width: usize) -> rusqlite::Result<Self> {
        let mut values = Vec::with_capacity(domain_width);
        for i in 0..domain_width {
            values.push(row.get::<_, Value>(3 + i)?);
        }
        Ok(SyncRow {
            id: row.get(0)?,
            sync_time: row.get(1)?,
            sync_id: row.get(2)?,
            values,
        })
    }

    /// All column values in table order, with the given sync columns.
    pub(crate) fn column_values(&self, id: i64, sync_time: i64, sync_id: Option<&str>) -> Vec<Value> {
        let mut all = Vec::with_capacity(self.values.len() + 3);
        all.push(Value::Integer(id));
        all.push(Value::Integer(sync_time));
        all.push(sync_id.map(|s| Value::Text(s.to_string())).unwrap_or(Value::Null));
        all.extend(self.values.iter().cloned());
        all
    }
}

/// Forward-only iteration over rows, independent of where they come from.
pub trait RowCursor {
    fn next_row(&mut self) -> Result<Option<SyncRow>>;
}

/// Cursor over the rows of a prepared SQLite statement.
pub struct SqliteRowCursor<'stmt> {
    rows: Rows<'stmt>,
    domain_width: usize,
}

impl<'stmt> SqliteRowCursor<'stmt> {
    pub fn new(rows: Rows<'stmt>, domain_width: usize) -> Self {
        Self { rows, domain_width }
    }
}

impl RowCursor for SqliteRowCursor<'_> {
    fn next_row(&mut self) -> Result<Option<SyncRow>> {
        match self.rows.next()? {
            Some(row) => Ok(Some(SyncRow::read(row, self.domain_width)?)),
            None => Ok(None),
        }
    }
}

/// Cursor over rows already loaded in memory.
pub struct VecCursor {
    rows: std::vec::IntoIter<SyncRow>,
}

impl VecCursor {
    pub fn new(rows: Vec<SyncRow>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl RowCursor for VecCursor {
    fn next_row(&mut self) -> Result<Option<SyncRow>> {
        Ok(self.rows.next())
    }
}

/// Wraps a cursor to expose its current row without consuming it.
pub struct Lookahead<C: RowCursor> {
    cursor: C,
    head: Option<SyncRow>,
}

impl<C: RowCursor> Lookahead<C> {
    pub fn new(mut cursor: C) -> Result<Self> {
        let head = cursor.next_row()?;
        Ok(Self { cursor, head })
    }

    pub fn peek(&self) -> Option<&SyncRow> {
        self.head.as_ref()
    }

    pub fn advance(&mut self) -> Result<Option<SyncRow>> {
        let current = self.head.take();
        if current.is_some() {
            self.head = self.cursor.next_row()?;
        }
        Ok(current)
    }
}
