//! Library sync server
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod catalog_store;
pub mod config;
pub mod enrichment;
pub mod feed;
pub mod scanner;
pub mod server;
pub mod sqlite_persistence;
pub mod sync;

// Re-export commonly used types for convenience
pub use catalog_store::{CatalogStore, SqliteCatalogStore};
pub use feed::SyncFeedService;
pub use scanner::{LibraryScanner, ScanSettings};
pub use server::{run_server, RequestsLoggingLevel};
