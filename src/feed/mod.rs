//! Change feeds for replicas, one per entity kind.

mod wire;

pub use wire::{parse_body, ChannelWriter, FeedBody, CHUNK_SIZE};

use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::catalog_store::{CatalogStore, EntityKind, StagingOrigin, StagingStore};

/// Feed header names, lowercase as sent on the wire.
pub const MODIFIED_SINCE_HEADER: &str = "x-modified-since";
pub const RECORDS_MODIFIED_HEADER: &str = "x-records-modified";
pub const RECORDS_DELETED_HEADER: &str = "x-records-deleted";
pub const LAST_MODIFIED_HEADER: &str = "x-last-modified";

/// Reads the client's watermark. Missing or malformed values ask for
/// everything.
pub fn parse_watermark(value: Option<&str>) -> i64 {
    let Some(value) = value else {
        return 0;
    };
    match value.trim().parse::<i64>() {
        Ok(since) => since,
        Err(_) => {
            warn!("Malformed {} value {:?}, sending full feed", MODIFIED_SINCE_HEADER, value);
            0
        }
    }
}

/// Changes of one kind since a watermark, held in a private staging store
/// until written out.
pub struct FeedSnapshot {
    pub kind: EntityKind,
    pub modified: usize,
    pub deleted: usize,
    /// Highest sync time in the snapshot, or the requested watermark when
    /// nothing changed.
    pub watermark: i64,
    staging: StagingStore,
}

impl FeedSnapshot {
    /// Writes deleted ids then changed records.
    pub fn write_body<W: Write>(&self, out: &mut W) -> Result<()> {
        let deleted = self.staging.tombstone_ids(self.kind)?;
        wire::write_count(out, deleted.len())?;
        for id in deleted {
            wire::write_id(out, id)?;
        }

        wire::write_count(out, self.modified)?;
        self.staging.for_each_record(self.kind, |record| {
            wire::write_record(out, &record)?;
            Ok(())
        })?;
        out.flush()?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct SyncFeedService {
    store: Arc<dyn CatalogStore>,
}

impl SyncFeedService {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub fn pull(&self, kind: EntityKind, since: i64) -> Result<FeedSnapshot> {
        let staging = StagingStore::new(StagingOrigin::Local)?;
        let counts = self
            .store
            .find_local_changes(kind, since, &staging)
            .with_context(|| format!("Failed to collect {} changes since {}", kind, since))?;
        let watermark = staging.max_sync_time(kind)?.unwrap_or(since).max(since);
        debug!(
            "Feed {} since {}: {} modified, {} deleted, watermark {}",
            kind, since, counts.modified, counts.deleted, watermark
        );
        Ok(FeedSnapshot {
            kind,
            modified: counts.modified,
            deleted: counts.deleted,
            watermark,
            staging,
        })
    }
}
