mod file_config;

pub use file_config::{AuthConfig, EnrichmentConfig, FileConfig, ScanConfig};

use crate::enrichment::DEFAULT_QUEUE_CAPACITY;
use crate::scanner::{ScanSettings, DEFAULT_THUMBNAIL_SIZE};
use crate::server::{RequestsLoggingLevel, ServerConfig};
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub library_paths: Vec<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub lastfm_api_key: Option<String>,
    pub rescan_interval_minutes: Option<u64>,
    pub auth_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub scan: ScanSettings,
    /// `None` when periodic rescans are off.
    pub rescan_interval: Option<Duration>,
    pub lastfm_api_key: Option<String>,
    pub auth_password: Option<String>,
}

fn normalize_extensions(extensions: Vec<String>) -> Vec<String> {
    extensions
        .into_iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or(cli.logging_level);

        let scan_file = file.scan.unwrap_or_default();
        let roots: Vec<PathBuf> = match scan_file.library_paths {
            Some(paths) => paths.into_iter().map(PathBuf::from).collect(),
            None => cli.library_paths.clone(),
        };
        if roots.is_empty() {
            bail!("At least one library path must be given via --library-path or [scan]");
        }

        let rescan_interval = scan_file
            .rescan_interval_minutes
            .or(cli.rescan_interval_minutes)
            .filter(|minutes| *minutes > 0)
            .map(|minutes| Duration::from_secs(minutes * 60));

        let enrichment = file.enrichment.unwrap_or_default();
        let lastfm_api_key = enrichment
            .lastfm_api_key
            .or_else(|| cli.lastfm_api_key.clone())
            .filter(|key| !key.trim().is_empty());

        let mut scan = ScanSettings {
            roots,
            enrichment_capacity: enrichment
                .queue_capacity
                .filter(|c| *c > 0)
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
            thumbnail_size: enrichment
                .thumbnail_size
                .filter(|s| *s > 0)
                .map(|s| (s, s))
                .unwrap_or(DEFAULT_THUMBNAIL_SIZE),
            sweep_policy: scan_file.sweep_policy.unwrap_or_default(),
            ..Default::default()
        };
        if let Some(extensions) = scan_file.song_extensions {
            scan.song_extensions = normalize_extensions(extensions);
        }
        if let Some(extensions) = scan_file.playlist_extensions {
            scan.playlist_extensions = normalize_extensions(extensions);
        }

        let auth_password = file
            .auth
            .and_then(|auth| auth.password)
            .or_else(|| cli.auth_password.clone())
            .filter(|password| !password.is_empty());

        Ok(Self {
            db_dir,
            port,
            logging_level,
            scan,
            rescan_interval,
            lastfm_api_key,
            auth_password,
        })
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir.join("catalog.db")
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            requests_logging_level: self.logging_level,
            port: self.port,
            auth_password: self.auth_password.clone(),
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::SweepPolicy;
    use tempfile::TempDir;

    fn cli_for(temp_dir: &TempDir) -> CliConfig {
        CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            library_paths: vec![PathBuf::from("/music")],
            port: 5545,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("BODY"),
            Some(RequestsLoggingLevel::Body)
        ));
        assert!(parse_logging_level("invalid").is_none());
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            logging_level: RequestsLoggingLevel::Headers,
            lastfm_api_key: Some("key".to_string()),
            rescan_interval_minutes: Some(15),
            auth_password: Some("pw".to_string()),
            ..cli_for(&temp_dir)
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.scan.roots, vec![PathBuf::from("/music")]);
        assert_eq!(config.port, 5545);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
        assert_eq!(config.lastfm_api_key.as_deref(), Some("key"));
        assert_eq!(config.rescan_interval, Some(Duration::from_secs(900)));
        assert_eq!(config.auth_password.as_deref(), Some("pw"));
        assert_eq!(config.scan.enrichment_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.scan.sweep_policy, SweepPolicy::Tombstone);
        assert_eq!(config.catalog_db_path(), temp_dir.path().join("catalog.db"));
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/should/be/overridden")),
            lastfm_api_key: Some("cli-key".to_string()),
            rescan_interval_minutes: Some(15),
            ..cli_for(&temp_dir)
        };
        let file_config = FileConfig {
            db_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            port: Some(4000),
            logging_level: Some("body".to_string()),
            scan: Some(ScanConfig {
                library_paths: Some(vec!["/toml/music".to_string()]),
                rescan_interval_minutes: Some(0),
                song_extensions: Some(vec![".MP3".to_string(), "opus".to_string()]),
                sweep_policy: Some(SweepPolicy::KeepMarked),
                ..Default::default()
            }),
            enrichment: Some(EnrichmentConfig {
                thumbnail_size: Some(128),
                ..Default::default()
            }),
            auth: Some(AuthConfig {
                password: Some("toml-pw".to_string()),
            }),
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.port, 4000);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Body);
        assert_eq!(config.scan.roots, vec![PathBuf::from("/toml/music")]);
        assert_eq!(config.rescan_interval, None);
        assert_eq!(config.scan.song_extensions, vec!["mp3", "opus"]);
        assert_eq!(config.scan.playlist_extensions, vec!["pls", "m3u"]);
        assert_eq!(config.scan.sweep_policy, SweepPolicy::KeepMarked);
        assert_eq!(config.scan.thumbnail_size, (128, 128));
        assert_eq!(config.auth_password.as_deref(), Some("toml-pw"));
        // CLI value used when TOML doesn't specify
        assert_eq!(config.lastfm_api_key.as_deref(), Some("cli-key"));
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let cli = CliConfig {
            library_paths: vec![PathBuf::from("/music")],
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("db_dir must be specified"));
    }

    #[test]
    fn test_resolve_nonexistent_db_dir_error() {
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/nonexistent/path/that/should/not/exist")),
            library_paths: vec![PathBuf::from("/music")],
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_resolve_db_dir_not_directory_error() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(temp_file.path().to_path_buf()),
            library_paths: vec![PathBuf::from("/music")],
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_resolve_requires_a_library_path() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            library_paths: vec![],
            ..cli_for(&temp_dir)
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("library path"));
    }

    #[test]
    fn test_blank_secrets_are_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            lastfm_api_key: Some("  ".to_string()),
            auth_password: Some(String::new()),
            ..cli_for(&temp_dir)
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert!(config.lastfm_api_key.is_none());
        assert!(config.server_config().auth_password.is_none());
    }
}
