//! Last.fm metadata source.
//!
//! Responses are XML and are read with a pull parser that stops at the first
//! section after the fields we need, so the rest of the body is never read.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::blocking::Client;
use std::io::{BufRead, BufReader, Read};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::{EnrichmentError, EnrichmentTask, MetadataSource, RemoteInfo};

const LASTFM_API_BASE: &str = "https://ws.audioscrobbler.com/2.0/";
const RATE_LIMIT_INTERVAL: Duration = Duration::from_millis(200); // 5 req/sec
const USER_AGENT: &str = concat!("library-server/", env!("CARGO_PKG_VERSION"));

/// Last.fm error code for unknown artists and albums.
const NOT_FOUND_CODE: &str = "6";

const ARTIST_STOP_TAGS: &[&[u8]] = &[b"stats", b"similar", b"tags", b"bio"];
const ALBUM_STOP_TAGS: &[&[u8]] = &[b"tracks", b"toptags", b"wiki"];

pub struct LastFmClient {
    client: Client,
    api_key: String,
    base_url: String,
    last_request: Mutex<Instant>,
}

impl LastFmClient {
    pub fn new(api_key: &str) -> anyhow::Result<Self> {
        Self::with_base_url(api_key, LASTFM_API_BASE)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
            last_request: Mutex::new(Instant::now() - RATE_LIMIT_INTERVAL),
        })
    }

    fn rate_limit(&self) {
        let mut last = self.last_request.lock().unwrap();
        let elapsed = last.elapsed();
        if elapsed < RATE_LIMIT_INTERVAL {
            std::thread::sleep(RATE_LIMIT_INTERVAL - elapsed);
        }
        *last = Instant::now();
    }

    fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<reqwest::blocking::Response, EnrichmentError> {
        if cancel.is_cancelled() {
            return Err(EnrichmentError::Cancelled);
        }
        let response = self.client.get(url).query(query).send()?;
        if cancel.is_cancelled() {
            return Err(EnrichmentError::Cancelled);
        }
        Ok(response)
    }
}

impl MetadataSource for LastFmClient {
    fn lookup(
        &self,
        task: &EnrichmentTask,
        cancel: &CancellationToken,
    ) -> Result<Option<RemoteInfo>, EnrichmentError> {
        let mut query = vec![("api_key", self.api_key.as_str())];
        match task {
            EnrichmentTask::Artist { name, .. } => {
                query.push(("method", "artist.getinfo"));
                query.push(("artist", name.as_str()));
            }
            EnrichmentTask::Album { artist, album, .. } => {
                query.push(("method", "album.getinfo"));
                query.push(("artist", artist.as_str()));
                query.push(("album", album.as_str()));
            }
        }

        self.rate_limit();
        let response = self.get(&self.base_url, &query, cancel)?;
        // Errors come back as <lfm status="failed"> documents with 4xx codes
        let status = response.status();
        if status.is_server_error() {
            return Err(EnrichmentError::Status(status.as_u16()));
        }

        let reader = BufReader::new(response);
        match task {
            EnrichmentTask::Artist { .. } => parse_artist_info(reader),
            EnrichmentTask::Album { .. } => parse_album_info(reader),
        }
    }

    fn fetch_image(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, EnrichmentError> {
        let response = self.get(url, &[], cancel)?;
        if !response.status().is_success() {
            return Err(EnrichmentError::Status(response.status().as_u16()));
        }
        let mut data = Vec::new();
        response
            .take(16 * 1024 * 1024)
            .read_to_end(&mut data)
            .map_err(|e| EnrichmentError::Api(format!("failed to read image: {}", e)))?;
        if cancel.is_cancelled() {
            return Err(EnrichmentError::Cancelled);
        }
        Ok(data)
    }
}

/// Parses an `artist.getinfo` response.
pub fn parse_artist_info<R: BufRead>(input: R) -> Result<Option<RemoteInfo>, EnrichmentError> {
    parse_info(input, b"artist", ARTIST_STOP_TAGS)
}

/// Parses an `album.getinfo` response.
pub fn parse_album_info<R: BufRead>(input: R) -> Result<Option<RemoteInfo>, EnrichmentError> {
    parse_info(input, b"album", ALBUM_STOP_TAGS)
}

#[derive(Clone, Copy)]
enum Field {
    Mbid,
    Image,
    Error,
}

fn root_status(start: &BytesStart) -> Result<bool, EnrichmentError> {
    if start.name().as_ref() != b"lfm" {
        return Err(EnrichmentError::Api("response is not an lfm document".to_string()));
    }
    let status = match start.try_get_attribute("status")? {
        Some(attr) => attr.unescape_value()?.into_owned(),
        None => String::new(),
    };
    Ok(status == "ok")
}

fn parse_info<R: BufRead>(
    input: R,
    entity: &[u8],
    stop_tags: &[&[u8]],
) -> Result<Option<RemoteInfo>, EnrichmentError> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut field: Option<Field> = None;
    let mut status_ok = None;
    let mut error_code = None;
    let mut error_message = String::new();
    let mut info = RemoteInfo::default();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) => {
                let name = start.name().as_ref().to_vec();
                if path.is_empty() {
                    status_ok = Some(root_status(&start)?);
                } else if status_ok == Some(true)
                    && path.len() == 2
                    && path[1] == entity
                    && stop_tags.contains(&name.as_slice())
                {
                    break;
                }

                field = match (path.len(), name.as_slice()) {
                    (1, b"error") => {
                        error_code = match start.try_get_attribute("code")? {
                            Some(attr) => Some(attr.unescape_value()?.into_owned()),
                            None => None,
                        };
                        Some(Field::Error)
                    }
                    (2, b"mbid") if path[1] == entity => Some(Field::Mbid),
                    (2, b"image") if path[1] == entity => Some(Field::Image),
                    _ => None,
                };
                path.push(name);
            }
            Event::Empty(start) => {
                if path.is_empty() {
                    status_ok = Some(root_status(&start)?);
                    break;
                }
            }
            Event::Text(text) => {
                let value = text.unescape()?;
                let value = value.trim();
                match field {
                    Some(Field::Mbid) if !value.is_empty() => {
                        info.mbid = Some(value.to_string())
                    }
                    // images are listed smallest first
                    Some(Field::Image) if !value.is_empty() => {
                        info.image_url = Some(value.to_string())
                    }
                    Some(Field::Error) => error_message = value.to_string(),
                    _ => {}
                }
            }
            Event::End(_) => {
                path.pop();
                field = None;
                if path.is_empty() {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    match status_ok {
        None => Err(EnrichmentError::Api("empty response".to_string())),
        Some(true) => Ok(Some(info)),
        Some(false) if error_code.as_deref() == Some(NOT_FOUND_CODE) => Ok(None),
        Some(false) => Err(EnrichmentError::Api(if error_message.is_empty() {
            "request failed".to_string()
        } else {
            error_message
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const ARTIST_RESPONSE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<lfm status="ok">
  <artist>
    <name>Cher</name>
    <mbid>bfcc6d75-a6a5-4bc6-8282-47aec8531818</mbid>
    <url>https://www.last.fm/music/Cher</url>
    <image size="small">https://img.example/s.png</image>
    <image size="medium">https://img.example/m.png</image>
    <image size="extralarge">https://img.example/xl.png</image>
    <image size="mega"></image>
    <streamable>0</streamable>
    <stats><listeners>1</listeners></stats>
    <bio><summary>A long biography &amp; more</summary></bio>
  </artist>
</lfm>"#;

    /// Fails the test if more than `remaining` bytes are read.
    struct LimitedReader<R> {
        inner: R,
        remaining: usize,
    }

    impl<R: Read> Read for LimitedReader<R> {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            let len = out.len().min(16);
            let n = self.inner.read(&mut out[..len])?;
            assert!(n <= self.remaining, "parser read past the stop tag");
            self.remaining -= n;
            Ok(n)
        }
    }

    #[test]
    fn reads_mbid_and_largest_image() {
        let info = parse_artist_info(ARTIST_RESPONSE.as_bytes()).unwrap().unwrap();
        assert_eq!(
            info.mbid.as_deref(),
            Some("bfcc6d75-a6a5-4bc6-8282-47aec8531818")
        );
        assert_eq!(info.image_url.as_deref(), Some("https://img.example/xl.png"));
    }

    #[test]
    fn stops_at_first_unneeded_section() {
        let stats_end = ARTIST_RESPONSE.find("<stats>").unwrap() + "<stats>".len();
        // one chunk of lookahead past the stop tag at most
        let reader = BufReader::with_capacity(
            16,
            LimitedReader {
                inner: Cursor::new(ARTIST_RESPONSE.as_bytes().to_vec()),
                remaining: stats_end + 16,
            },
        );
        let info = parse_artist_info(reader).unwrap().unwrap();
        assert!(info.mbid.is_some());
        assert!(ARTIST_RESPONSE.len() > stats_end + 16);
    }

    #[test]
    fn album_response() {
        let xml = r#"<lfm status="ok"><album><name>Believe</name><artist>Cher</artist>
            <mbid></mbid><image size="large">https://img.example/a.png</image>
            <tracks><track><mbid>not-the-album</mbid></track></tracks></album></lfm>"#;
        let info = parse_album_info(xml.as_bytes()).unwrap().unwrap();
        assert_eq!(info.mbid, None);
        assert_eq!(info.image_url.as_deref(), Some("https://img.example/a.png"));
    }

    #[test]
    fn requires_ok_status() {
        let not_found = r#"<lfm status="failed"><error code="6">The artist you supplied could not be found</error></lfm>"#;
        assert_eq!(parse_artist_info(not_found.as_bytes()).unwrap(), None);

        let bad_key = r#"<lfm status="failed"><error code="10">Invalid API key</error></lfm>"#;
        match parse_artist_info(bad_key.as_bytes()) {
            Err(EnrichmentError::Api(message)) => assert_eq!(message, "Invalid API key"),
            other => panic!("unexpected result {:?}", other),
        }

        assert!(parse_artist_info(r#"<lfm status="failed"/>"#.as_bytes()).is_err());
        assert!(parse_artist_info("<html></html>".as_bytes()).is_err());
        assert!(parse_artist_info("".as_bytes()).is_err());
    }
}
