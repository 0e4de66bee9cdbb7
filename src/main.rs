use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pezzottify_library_server::catalog_store::{CatalogStore, SqliteCatalogStore};
use pezzottify_library_server::config::{AppConfig, CliConfig, FileConfig};
use pezzottify_library_server::enrichment::{LastFmClient, MetadataSource, NoOpMetadataSource};
use pezzottify_library_server::scanner::{LibraryScanner, LoftyTagReader};
use pezzottify_library_server::server::config::DEFAULT_PORT;
use pezzottify_library_server::server::{run_server, RequestsLoggingLevel, ServerState};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the command line.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the catalog database.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// A directory to scan for music, can be repeated.
    #[clap(long = "library-path", value_parser = parse_path)]
    pub library_paths: Vec<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Last.fm API key, enables artist and album enrichment.
    #[clap(long)]
    pub lastfm_api_key: Option<String>,

    /// Minutes between library rescans, 0 or unset to scan only at startup.
    #[clap(long)]
    pub rescan_interval_minutes: Option<u64>,

    /// Require HTTP Basic auth with this password.
    #[clap(long)]
    pub auth_password: Option<String>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            library_paths: self.library_paths.clone(),
            port: self.port,
            logging_level: self.logging_level,
            lastfm_api_key: self.lastfm_api_key.clone(),
            rescan_interval_minutes: self.rescan_interval_minutes,
            auth_password: self.auth_password.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!(
        "Opening SQLite catalog database at {:?}...",
        config.catalog_db_path()
    );
    let catalog_store: Arc<dyn CatalogStore> =
        Arc::new(SqliteCatalogStore::new(config.catalog_db_path())?);

    // the blocking HTTP client must not be built on a runtime thread
    let api_key = config.lastfm_api_key.clone();
    let metadata: Arc<dyn MetadataSource> = match api_key {
        Some(key) => {
            info!("Last.fm enrichment enabled");
            Arc::new(tokio::task::spawn_blocking(move || LastFmClient::new(&key)).await??)
        }
        None => {
            info!("No Last.fm API key, enrichment disabled");
            Arc::new(NoOpMetadataSource)
        }
    };

    let scanner = Arc::new(LibraryScanner::new(
        catalog_store.clone(),
        Arc::new(LoftyTagReader),
        metadata,
        config.scan.clone(),
    ));
    scanner.start_scan();

    let rescans = config.rescan_interval.map(|interval| {
        info!("Rescanning the library every {} minutes", interval.as_secs() / 60);
        let scanner = scanner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            // Skip the first immediate tick, the startup scan covers it
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !scanner.start_scan() {
                    info!("Previous library scan still running, skipping rescan");
                }
            }
        })
    });

    let state = ServerState::new(config.server_config(), catalog_store, Some(scanner.clone()));
    run_server(state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down...");
    })
    .await?;

    if let Some(rescans) = rescans {
        rescans.abort();
        let _ = rescans.await;
    }
    tokio::task::spawn_blocking(move || scanner.stop_abruptly()).await?;
    Ok(())
}
