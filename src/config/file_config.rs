use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::scanner::SweepPolicy;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub logging_level: Option<String>,

    pub scan: Option<ScanConfig>,
    pub enrichment: Option<EnrichmentConfig>,
    pub auth: Option<AuthConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ScanConfig {
    pub library_paths: Option<Vec<String>>,
    /// 0 disables periodic rescans.
    pub rescan_interval_minutes: Option<u64>,
    /// Without the dot, matched case-insensitively.
    pub song_extensions: Option<Vec<String>>,
    pub playlist_extensions: Option<Vec<String>>,
    pub sweep_policy: Option<SweepPolicy>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub lastfm_api_key: Option<String>,
    pub queue_capacity: Option<usize>,
    /// Side of the square thumbnail stored for downloaded artwork.
    pub thumbnail_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub password: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
