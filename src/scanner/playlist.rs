//! PLS and M3U playlist parsing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaylistParseError {
    #[error("failed to read playlist: {0}")]
    Io(#[from] io::Error),
    #[error("missing [playlist] header")]
    MissingHeader,
    #[error("unsupported playlist format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistFormat {
    Pls,
    M3u,
}

impl PlaylistFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pls" => Some(PlaylistFormat::Pls),
            "m3u" => Some(PlaylistFormat::M3u),
            _ => None,
        }
    }
}

/// Reads a playlist and returns the paths of its entries, in order.
///
/// Entries are not checked for existence. Relative entries are resolved
/// against the playlist's directory.
pub fn parse_playlist(path: &Path) -> Result<Vec<PathBuf>, PlaylistParseError> {
    let format = PlaylistFormat::from_path(path)
        .ok_or_else(|| PlaylistParseError::UnsupportedFormat(path.display().to_string()))?;
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let base = path.parent().unwrap_or_else(|| Path::new("/"));
    match format {
        PlaylistFormat::Pls => parse_pls(&text, base),
        PlaylistFormat::M3u => Ok(parse_m3u(&text, base)),
    }
}

pub fn parse_pls(text: &str, base: &Path) -> Result<Vec<PathBuf>, PlaylistParseError> {
    let mut lines = text
        .trim_start_matches('\u{feff}')
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty());

    match lines.next() {
        Some(first) if first.eq_ignore_ascii_case("[playlist]") => {}
        _ => return Err(PlaylistParseError::MissingHeader),
    }

    let entries = lines
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let index = key.strip_prefix("File")?;
            if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            resolve_entry(value.trim(), base)
        })
        .collect();
    Ok(entries)
}

pub fn parse_m3u(text: &str, base: &Path) -> Vec<PathBuf> {
    text.trim_start_matches('\u{feff}')
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| resolve_entry(line, base))
        .collect()
}

fn resolve_entry(value: &str, base: &Path) -> Option<PathBuf> {
    if value.is_empty() {
        return None;
    }
    if let Some(rest) = value.strip_prefix("file://") {
        let rest = rest.strip_prefix("localhost").unwrap_or(rest);
        let decoded = urlencoding::decode(rest).ok()?;
        return Some(PathBuf::from(decoded.into_owned()));
    }
    // streams and other remote locations
    if value.contains("://") {
        return None;
    }
    let path = Path::new(value);
    if path.is_absolute() {
        Some(path.to_path_buf())
    } else {
        Some(base.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_pls_entries() {
        let text = "\n[playlist]\nNumberOfEntries=4\nFile1=file:///music/My%20Song.mp3\nTitle1=My Song\nLength1=120\nFile2=sub/b.mp3\nFile3=/abs/c.mp3\nbogus line\nFileX=ignored.mp3\nFile4=http://radio.example/stream\nVersion=2\n";
        let entries = parse_pls(text, Path::new("/lists")).unwrap();
        assert_eq!(
            entries,
            vec![
                PathBuf::from("/music/My Song.mp3"),
                PathBuf::from("/lists/sub/b.mp3"),
                PathBuf::from("/abs/c.mp3"),
            ]
        );
    }

    #[test]
    fn pls_requires_header() {
        let result = parse_pls("File1=/a.mp3\n", Path::new("/"));
        assert!(matches!(result, Err(PlaylistParseError::MissingHeader)));
        assert!(parse_pls("  [Playlist]  \n", Path::new("/")).unwrap().is_empty());
    }

    #[test]
    fn parses_m3u_entries() {
        let text = "#EXTM3U\n#EXTINF:123,Artist - Title\nrel/one.mp3\n\n/abs/two.mp3\nfile:///x/three%23.mp3\n";
        assert_eq!(
            parse_m3u(text, Path::new("/base")),
            vec![
                PathBuf::from("/base/rel/one.mp3"),
                PathBuf::from("/abs/two.mp3"),
                PathBuf::from("/x/three#.mp3"),
            ]
        );
    }

    #[test]
    fn parse_playlist_dispatches_on_extension() {
        let dir = TempDir::new().unwrap();
        let pls = dir.path().join("list.PLS");
        fs::write(&pls, "[playlist]\nFile1=a.mp3\n").unwrap();
        assert_eq!(parse_playlist(&pls).unwrap(), vec![dir.path().join("a.mp3")]);

        let txt = dir.path().join("list.txt");
        fs::write(&txt, "a.mp3").unwrap();
        assert!(matches!(
            parse_playlist(&txt),
            Err(PlaylistParseError::UnsupportedFormat(_))
        ));

        assert!(matches!(
            parse_playlist(&dir.path().join("missing.m3u")),
            Err(PlaylistParseError::Io(_))
        ));
    }
}
