//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own library and catalog.

use super::constants::*;
use super::fixtures::{album_art_png, create_test_library, FixtureTagReader};
use pezzottify_library_server::catalog_store::{
    CatalogStore, EntityKind, ImageData, SqliteCatalogStore,
};
use pezzottify_library_server::enrichment::NoOpMetadataSource;
use pezzottify_library_server::scanner::{LibraryScanner, ScanReport, ScanSettings};
use pezzottify_library_server::server::{make_app, RequestsLoggingLevel, ServerConfig, ServerState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Test server instance with an isolated library and catalog
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Catalog for direct database access in tests
    pub store: Arc<SqliteCatalogStore>,

    /// Scanner behind `POST /scan`
    pub scanner: Arc<LibraryScanner>,

    // Private fields - keep resources alive until drop
    library_root: PathBuf,
    _library_dir: TempDir,
    _db_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a server without authentication
    pub async fn spawn() -> Self {
        Self::spawn_with_password(None).await
    }

    /// Spawns a new test server on a random port
    ///
    /// This function:
    /// 1. Creates the fixture library and an empty catalog
    /// 2. Scans the library once and stores artwork for the first album
    /// 3. Binds to a random port (127.0.0.1:0)
    /// 4. Spawns the server in a background task
    /// 5. Waits for the server to be ready
    ///
    /// # Panics
    ///
    /// Panics if any of the steps fail.
    pub async fn spawn_with_password(password: Option<&str>) -> Self {
        let library_dir = create_test_library().expect("Failed to create test library");
        let library_root = library_dir
            .path()
            .canonicalize()
            .expect("Failed to resolve library path");
        let db_dir = TempDir::new().expect("Failed to create db dir");

        let store = Arc::new(
            SqliteCatalogStore::new(db_dir.path().join("catalog.db"))
                .expect("Failed to open catalog store"),
        );

        let settings = ScanSettings {
            roots: vec![library_root.clone()],
            ..Default::default()
        };
        let scanner = Arc::new(LibraryScanner::new(
            store.clone(),
            Arc::new(FixtureTagReader),
            Arc::new(NoOpMetadataSource),
            settings,
        ));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            auth_password: password.map(str::to_string),
        };
        let state = ServerState::new(config, store.clone(), Some(scanner.clone()));
        let app = make_app(state);

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            store,
            scanner,
            library_root,
            _library_dir: library_dir,
            _db_dir: db_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.rescan().await;
        let album_id = server
            .store
            .get_song(server.song_id(SONG_1_FILE))
            .expect("Failed to load song")
            .expect("Song 1 missing")
            .album_id;
        server
            .store
            .replace_images(
                EntityKind::Album,
                album_id,
                &[ImageData {
                    width: ALBUM_ART_SIZE,
                    height: ALBUM_ART_SIZE,
                    data: album_art_png(ALBUM_ART_SIZE),
                }],
            )
            .expect("Failed to store artwork");

        server.wait_for_ready().await;

        server
    }

    /// Absolute path of a file in the fixture library
    pub fn library_path(&self, rel: &str) -> PathBuf {
        self.library_root.join(rel)
    }

    /// Catalog id of a fixture song
    pub fn song_id(&self, rel: &str) -> i64 {
        self.store
            .find_song_by_filename(&self.library_path(rel).to_string_lossy())
            .expect("Song lookup failed")
            .unwrap_or_else(|| panic!("{} is not in the catalog", rel))
            .meta
            .id
    }

    /// Runs a full scan on a blocking thread
    pub async fn rescan(&self) -> ScanReport {
        let scanner = self.scanner.clone();
        tokio::task::spawn_blocking(move || scanner.scan_blocking(&CancellationToken::new()))
            .await
            .expect("Scan task panicked")
            .expect("Scan failed")
    }

    /// Waits for the server to become ready by polling the /info endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/info", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
