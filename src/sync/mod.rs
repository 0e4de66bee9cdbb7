mod merge_engine;
mod row;
mod table;

pub(crate) use merge_engine::delete_with_tombstone;
pub use merge_engine::{ChangeCounts, MergeEngine, MergeReport};
pub use row::{Lookahead, RowCursor, SqliteRowCursor, SyncRow, VecCursor};
pub use table::SyncTable;
