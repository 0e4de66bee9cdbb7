//! Filesystem scanner keeping the catalog in step with the library roots.
//!
//! A scan marks every song and playlist stale, walks the roots staging new
//! and changed entities into a [`ScanBatch`], merges the batch and finally
//! sweeps whatever is still marked. At most one scan runs at a time.

mod batch;
mod crawl;
mod name_match;
mod playlist;
mod tags;

pub use batch::ScanBatch;
pub use name_match::{name_match, UNKNOWN_NAME};
pub use playlist::{parse_m3u, parse_playlist, parse_pls, PlaylistFormat, PlaylistParseError};
pub use tags::{AudioTags, FileSkip, LoftyTagReader, TagReader};

use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog_store::{CatalogStore, SweepReport};
use crate::enrichment::{
    Enricher, EnrichmentQueue, MetadataSource, QueueStats, DEFAULT_QUEUE_CAPACITY,
};
use crate::sync::MergeReport;
use crawl::Crawl;

pub const DEFAULT_SONG_EXTENSIONS: &[&str] = &["mp3", "mp4", "m4a", "m4p", "ogg", "flac"];
pub const DEFAULT_PLAYLIST_EXTENSIONS: &[&str] = &["pls", "m3u"];
pub const DEFAULT_THUMBNAIL_SIZE: (u32, u32) = (64, 64);

/// What happens to songs and playlists whose files were not seen by a
/// complete scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SweepPolicy {
    /// Delete them and record tombstones.
    #[default]
    Tombstone,
    /// Leave them in the catalog with `mark` set.
    KeepMarked,
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub roots: Vec<PathBuf>,
    /// Lowercase, without the dot.
    pub song_extensions: Vec<String>,
    pub playlist_extensions: Vec<String>,
    pub sweep_policy: SweepPolicy,
    pub enrichment_capacity: usize,
    pub thumbnail_size: (u32, u32),
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            roots: vec![],
            song_extensions: DEFAULT_SONG_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            playlist_extensions: DEFAULT_PLAYLIST_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            sweep_policy: SweepPolicy::default(),
            enrichment_capacity: DEFAULT_QUEUE_CAPACITY,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub files_seen: usize,
    pub songs_staged: usize,
    /// Songs whose modification time was unchanged.
    pub songs_unchanged: usize,
    pub playlists_staged: usize,
    pub files_skipped: usize,
    /// False when a root could not be read, no sweep happens then.
    pub complete: bool,
    pub merge: MergeReport,
    pub swept: SweepReport,
    pub enrichment: QueueStats,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan cancelled")]
    Cancelled,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Notified from the scanner thread as background scans progress.
pub trait ScanListener: Send + Sync {
    fn on_start(&self) {}

    fn on_progress(&self, _files_seen: usize) {}

    fn on_finished(&self, _outcome: &Result<ScanReport, ScanError>) {}
}

#[derive(Default)]
struct ScannerState {
    handle: Option<JoinHandle<Result<ScanReport, ScanError>>>,
    cancel: Option<CancellationToken>,
}

pub struct LibraryScanner {
    store: Arc<dyn CatalogStore>,
    tag_reader: Arc<dyn TagReader>,
    metadata: Arc<dyn MetadataSource>,
    settings: ScanSettings,
    listener: Mutex<Option<Arc<dyn ScanListener>>>,
    state: Mutex<ScannerState>,
}

impl LibraryScanner {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        tag_reader: Arc<dyn TagReader>,
        metadata: Arc<dyn MetadataSource>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            store,
            tag_reader,
            metadata,
            settings,
            listener: Mutex::new(None),
            state: Mutex::new(ScannerState::default()),
        }
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn set_listener(&self, listener: Arc<dyn ScanListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    fn listener(&self) -> Option<Arc<dyn ScanListener>> {
        self.listener.lock().unwrap().clone()
    }

    /// Starts a background scan. Returns false if one is already running.
    pub fn start_scan(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }
        if let Some(previous) = state.handle.take() {
            // already finished, reap it
            let _ = previous.join();
        }

        let cancel = CancellationToken::new();
        let scanner = self.clone();
        let token = cancel.clone();
        let spawned = std::thread::Builder::new()
            .name("library-scanner".to_string())
            .spawn(move || {
                let listener = scanner.listener();
                if let Some(listener) = &listener {
                    listener.on_start();
                }
                let outcome = scanner.scan_blocking(&token);
                match &outcome {
                    Ok(_) => {}
                    Err(ScanError::Cancelled) => info!("Library scan cancelled"),
                    Err(e) => error!("Library scan failed: {:#}", e),
                }
                if let Some(listener) = &listener {
                    listener.on_finished(&outcome);
                }
                outcome
            });

        match spawned {
            Ok(handle) => {
                state.handle = Some(handle);
                state.cancel = Some(cancel);
                true
            }
            Err(e) => {
                error!("Failed to spawn scanner thread: {}", e);
                false
            }
        }
    }

    pub fn is_active(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancels the running scan, if any, and waits for its thread to exit.
    pub fn stop_abruptly(&self) {
        let handle = {
            let mut state = self.state.lock().unwrap();
            if let Some(cancel) = state.cancel.take() {
                cancel.cancel();
            }
            state.handle.take()
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Scanner thread panicked");
            }
        }
    }

    /// Waits for the current background scan and returns its outcome.
    pub fn join(&self) -> Option<Result<ScanReport, ScanError>> {
        let handle = {
            let mut state = self.state.lock().unwrap();
            state.cancel = None;
            state.handle.take()
        }?;
        Some(
            handle
                .join()
                .unwrap_or_else(|_| Err(anyhow::anyhow!("scanner thread panicked").into())),
        )
    }

    /// Runs one scan on the calling thread.
    pub fn scan_blocking(&self, cancel: &CancellationToken) -> Result<ScanReport, ScanError> {
        let started = Instant::now();
        info!(
            "Starting library scan of {} root(s)",
            self.settings.roots.len()
        );

        self.store.mark_all_stale()?;

        let batch = Arc::new(ScanBatch::new(self.store.clone())?);
        let enricher = Enricher::new(
            self.metadata.clone(),
            batch.clone(),
            self.settings.thumbnail_size,
        );
        let queue = EnrichmentQueue::new(
            self.settings.enrichment_capacity,
            Arc::new(enricher),
            cancel.child_token(),
        );

        let listener = self.listener();
        let crawl = Crawl::new(
            self.store.as_ref(),
            &batch,
            self.tag_reader.as_ref(),
            self.metadata.is_enabled().then_some(&queue),
            &self.settings,
            cancel,
            listener.as_deref(),
        );

        let mut report = match crawl.run().and_then(|report| {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            Ok(report)
        }) {
            Ok(report) => report,
            Err(e) => {
                queue.request_cancel();
                batch.discard();
                return Err(e);
            }
        };

        report.merge = match batch.commit() {
            Ok(merge) => merge,
            Err(e) => {
                queue.request_cancel();
                return Err(e.into());
            }
        };

        if !report.complete {
            warn!("Some library roots could not be read, skipping sweep");
        } else if self.settings.sweep_policy == SweepPolicy::Tombstone {
            report.swept = self.store.sweep_stale()?;
        }

        report.enrichment = queue.shutdown_and_wait();

        info!(
            "Library scan finished in {:.1}s: {} files, {} songs staged, {} unchanged, {} playlists staged, {} skipped, merge {:?}, swept {:?}, {} enrichment tasks",
            started.elapsed().as_secs_f64(),
            report.files_seen,
            report.songs_staged,
            report.songs_unchanged,
            report.playlists_staged,
            report.files_skipped,
            report.merge,
            report.swept,
            report.enrichment.completed
        );
        Ok(report)
    }
}
