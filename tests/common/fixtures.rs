//! Test fixture creation
//!
//! Builds a small music library on disk. Song files hold `key=value` tag
//! lines instead of real audio, read back by [`FixtureTagReader`].

use super::constants::*;
use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use pezzottify_library_server::scanner::{AudioTags, FileSkip, TagReader};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tempfile::TempDir;

/// Reads the `key=value` header of fixture song files
pub struct FixtureTagReader;

impl TagReader for FixtureTagReader {
    fn read(&self, path: &Path) -> Result<AudioTags, FileSkip> {
        let text = fs::read_to_string(path)?;
        let mut tags = AudioTags::default();
        for line in text.lines() {
            match line.split_once('=') {
                Some(("title", v)) => tags.title = Some(v.to_string()),
                Some(("artist", v)) => tags.artist = Some(v.to_string()),
                Some(("album", v)) => tags.album = Some(v.to_string()),
                Some(("track", v)) => tags.track = v.parse().ok(),
                _ => {}
            }
        }
        Ok(tags)
    }
}

/// Writes a fixture song padded to [`TEST_AUDIO_SIZE_BYTES`]
pub fn write_song(root: &Path, rel: &str, title: &str, artist: &str, album: &str) -> Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut content =
        format!("title={}\nartist={}\nalbum={}\npad=", title, artist, album).into_bytes();
    content.resize(TEST_AUDIO_SIZE_BYTES, b'.');
    fs::write(&path, content).with_context(|| format!("Failed to write {}", rel))
}

/// Creates the fixture library in a fresh temporary directory
pub fn create_test_library() -> Result<TempDir> {
    let dir = TempDir::new()?;
    let root = dir.path();

    write_song(root, SONG_1_FILE, "Opening Track", "The Test Band", "First Album")?;
    write_song(root, SONG_2_FILE, "Second Song", "The Test Band", "First Album")?;
    write_song(root, SONG_3_FILE, "Smooth", "Jazz Ensemble", "Jazz Collection")?;
    fs::write(
        root.join(PLAYLIST_FILE),
        format!("#EXTM3U\n{}\n{}\n", SONG_2_FILE, SONG_3_FILE),
    )?;
    fs::write(root.join("notes.txt"), "not music")?;

    Ok(dir)
}

/// Square PNG used as album artwork
pub fn album_art_png(side: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(side, side, Rgba([20, 120, 200, 255]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .expect("Failed to encode fixture artwork");
    buf.into_inner()
}
