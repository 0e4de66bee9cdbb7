//! Song file streaming with byte ranges.

use super::auth::Authorized;
use super::state::GuardedCatalogStore;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, BufReader, SeekFrom},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start_inclusive: Option<u64>,
    end_inclusive: Option<u64>,
}

impl ByteRange {
    pub fn new(start_inclusive: Option<u64>, end_inclusive: Option<u64>) -> ByteRange {
        ByteRange {
            start_inclusive,
            end_inclusive,
        }
    }

    pub fn parse<S: AsRef<str>>(s: S) -> Option<ByteRange> {
        let v = s.as_ref().trim();
        let v = v.strip_prefix("bytes=")?;
        let (start, end) = v.split_once('-')?;
        if end.contains('-') || start.contains(',') || end.contains(',') {
            return None;
        }

        let parse_bound = |bound: &str| -> Result<Option<u64>, ()> {
            if bound.is_empty() {
                Ok(None)
            } else {
                bound.trim().parse::<u64>().map(Some).map_err(|_| ())
            }
        };
        Some(ByteRange {
            start_inclusive: parse_bound(start).ok()?,
            end_inclusive: parse_bound(end).ok()?,
        })
    }

    /// First and last byte to serve from a file of `length` bytes, or `None`
    /// when the range can't be satisfied. A range without start is a suffix.
    pub fn resolve(&self, length: u64) -> Option<(u64, u64)> {
        if length == 0 {
            return None;
        }
        let last = length - 1;
        match (self.start_inclusive, self.end_inclusive) {
            (None, None) => Some((0, last)),
            (None, Some(0)) => None,
            (None, Some(suffix)) => Some((length.saturating_sub(suffix), last)),
            (Some(start), _) if start > last => None,
            (Some(start), None) => Some((start, last)),
            (Some(start), Some(end)) if end < start => None,
            (Some(start), Some(end)) => Some((start, end.min(last))),
        }
    }
}

fn range_not_satisfiable(length: u64) -> Response {
    (
        StatusCode::RANGE_NOT_SATISFIABLE,
        [(header::CONTENT_RANGE, format!("bytes */{}", length))],
    )
        .into_response()
}

pub async fn stream_song(
    _auth: Authorized,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    let byte_range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(ByteRange::parse);

    let song = match tokio::task::spawn_blocking(move || catalog_store.get_song(id)).await {
        Ok(Ok(Some(song))) => song,
        Ok(Ok(None)) => return StatusCode::NOT_FOUND.into_response(),
        Ok(Err(e)) => {
            error!("Failed to load song {}: {:#}", id, e);
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            error!("Song lookup task failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    debug!("Streaming song {} from {}", id, song.filename);

    let mut file = match File::open(&song.filename).await {
        Ok(x) => x,
        Err(e) => {
            debug!("Song file {} not readable: {}", song.filename, e);
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let file_length = match file.metadata().await {
        Ok(x) => x.len(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let (status_code, start, end) = match byte_range {
        None
        | Some(ByteRange {
            start_inclusive: None,
            end_inclusive: None,
        }) => (StatusCode::OK, 0, file_length.saturating_sub(1)),
        Some(range) => match range.resolve(file_length) {
            Some((start, end)) => (StatusCode::PARTIAL_CONTENT, start, end),
            None => return range_not_satisfiable(file_length),
        },
    };
    let chunk_size = if file_length == 0 { 0 } else { end - start + 1 };

    if start > 0 && file.seek(SeekFrom::Start(start)).await.is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let file_reader = BufReader::with_capacity(4096 * 16, file).take(chunk_size);
    let stream = ReaderStream::with_capacity(file_reader, 4096 * 16);

    let mut response = Response::builder()
        .status(status_code)
        .header(header::CONTENT_TYPE, song.mime_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, chunk_size);
    if status_code == StatusCode::PARTIAL_CONTENT {
        response = response.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, file_length),
        );
    }
    response
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
