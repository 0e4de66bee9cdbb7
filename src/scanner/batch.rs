use anyhow::{bail, Result};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::catalog_store::{
    CatalogStore, EntityKind, ImageData, StagingOrigin, StagingStore,
};
use crate::enrichment::EnrichmentTarget;
use crate::sync::MergeReport;

enum BatchState {
    Open(StagingStore),
    Committed,
    Discarded,
}

/// The staged changes of one scan, until merged or thrown away.
///
/// Enrichment results for entities that only exist in the batch are written
/// into it, so they are merged together with the entity. The batch lock is
/// always taken before the catalog's.
pub struct ScanBatch {
    state: Mutex<BatchState>,
    store: Arc<dyn CatalogStore>,
}

impl ScanBatch {
    pub fn new(store: Arc<dyn CatalogStore>) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(BatchState::Open(StagingStore::new(StagingOrigin::Local)?)),
            store,
        })
    }

    /// Runs `f` on the staging store while the batch is open.
    pub fn with_staging<T>(&self, f: impl FnOnce(&StagingStore) -> Result<T>) -> Result<T> {
        match &*self.state.lock().unwrap() {
            BatchState::Open(staging) => f(staging),
            BatchState::Committed => bail!("scan batch already committed"),
            BatchState::Discarded => bail!("scan batch was discarded"),
        }
    }

    /// Merges the batch into the catalog. The batch is closed either way.
    pub fn commit(&self) -> Result<MergeReport> {
        let mut state = self.state.lock().unwrap();
        let staging = match std::mem::replace(&mut *state, BatchState::Discarded) {
            BatchState::Open(staging) => staging,
            BatchState::Committed => bail!("scan batch already committed"),
            BatchState::Discarded => bail!("scan batch was discarded"),
        };
        let report = self.store.commit_staging(&staging)?;
        *state = BatchState::Committed;
        Ok(report)
    }

    pub fn discard(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, BatchState::Open(_)) {
            debug!("Discarding scan batch");
        }
        *state = BatchState::Discarded;
    }
}

impl EnrichmentTarget for ScanBatch {
    fn set_mbid(&self, kind: EntityKind, id: i64, mbid: &str) -> Result<()> {
        let state = self.state.lock().unwrap();
        match &*state {
            BatchState::Open(staging) if staging.set_mbid(kind, id, mbid)? => Ok(()),
            BatchState::Discarded => Ok(()),
            _ => {
                if !self.store.set_mbid(kind, id, mbid)? {
                    debug!("{} {} is gone, dropping its mbid", kind, id);
                }
                Ok(())
            }
        }
    }

    fn store_images(&self, kind: EntityKind, id: i64, images: &[ImageData]) -> Result<()> {
        let state = self.state.lock().unwrap();
        if matches!(*state, BatchState::Discarded) {
            return Ok(());
        }
        self.store.replace_images(kind, id, images)
    }
}
