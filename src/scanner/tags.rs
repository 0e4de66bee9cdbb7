//! Audio tag reading.

use lofty::prelude::*;
use lofty::probe::Probe;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Why a file was skipped by the scanner. Never fatal to a scan.
#[derive(Debug, Error)]
pub enum FileSkip {
    #[error("unreadable file: {0}")]
    Unreadable(#[from] io::Error),
    #[error("unable to parse tags: {0}")]
    Tags(String),
    #[error("no title tag")]
    MissingTitle,
}

/// The tags and audio properties the catalog keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track: Option<u32>,
    /// Kilobits per second.
    pub bitrate: Option<u32>,
    /// Seconds.
    pub length: Option<u64>,
}

pub trait TagReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<AudioTags, FileSkip>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTagReader;

fn non_empty(value: Option<std::borrow::Cow<'_, str>>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl TagReader for LoftyTagReader {
    fn read(&self, path: &Path) -> Result<AudioTags, FileSkip> {
        let tagged_file = Probe::open(path)
            .and_then(|probe| probe.read())
            .map_err(|e| FileSkip::Tags(e.to_string()))?;

        let properties = tagged_file.properties();
        let length = properties.duration().as_secs();
        let mut tags = AudioTags {
            bitrate: properties.audio_bitrate(),
            length: (length > 0).then_some(length),
            ..Default::default()
        };

        if let Some(tag) = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())
        {
            tags.title = non_empty(tag.title());
            tags.artist = non_empty(tag.artist());
            tags.album = non_empty(tag.album());
            tags.track = tag.track();
        }
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn garbage_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noise.bin");
        std::fs::write(&path, b"definitely not audio").unwrap();

        assert!(matches!(
            LoftyTagReader.read(&path),
            Err(FileSkip::Tags(_))
        ));
    }

    #[test]
    fn missing_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        assert!(LoftyTagReader.read(&dir.path().join("gone.mp3")).is_err());
    }
}
