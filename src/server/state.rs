use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;

use crate::catalog_store::CatalogStore;
use crate::feed::SyncFeedService;
use crate::scanner::LibraryScanner;

use super::ServerConfig;

pub type GuardedCatalogStore = Arc<dyn CatalogStore>;
pub type OptionalScanner = Option<Arc<LibraryScanner>>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub catalog_store: GuardedCatalogStore,
    pub feeds: SyncFeedService,
    pub scanner: OptionalScanner,
    pub hash: String,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        catalog_store: GuardedCatalogStore,
        scanner: OptionalScanner,
    ) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            feeds: SyncFeedService::new(catalog_store.clone()),
            catalog_store,
            scanner,
            hash: env!("GIT_HASH").to_string(),
        }
    }
}

impl FromRef<ServerState> for GuardedCatalogStore {
    fn from_ref(input: &ServerState) -> Self {
        input.catalog_store.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for SyncFeedService {
    fn from_ref(input: &ServerState) -> Self {
        input.feeds.clone()
    }
}

impl FromRef<ServerState> for OptionalScanner {
    fn from_ref(input: &ServerState) -> Self {
        input.scanner.clone()
    }
}
