//! Binary layout of feed bodies.
//!
//! ```text
//! u32 LE  deleted count
//! i64 LE  deleted id            (repeated)
//! u32 LE  record count
//! u32 LE  record length         (repeated, followed by the JSON record)
//! ```

use anyhow::{bail, Result};
use axum::body::Bytes;
use std::io::{self, Write};
use tokio::sync::mpsc;

use crate::catalog_store::Record;

/// Size of the chunks pushed to the response stream.
pub const CHUNK_SIZE: usize = 16 * 1024;

pub fn write_count<W: Write>(out: &mut W, count: usize) -> io::Result<()> {
    let count = u32::try_from(count)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "count overflows u32"))?;
    out.write_all(&count.to_le_bytes())
}

pub fn write_id<W: Write>(out: &mut W, id: i64) -> io::Result<()> {
    out.write_all(&id.to_le_bytes())
}

pub fn write_record<W: Write>(out: &mut W, record: &Record) -> io::Result<()> {
    let json = serde_json::to_vec(record)?;
    write_count(out, json.len())?;
    out.write_all(&json)
}

/// A feed body as seen by a client.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FeedBody {
    pub deleted: Vec<i64>,
    pub records: Vec<serde_json::Value>,
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.data.len() < len {
            bail!("feed body truncated");
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(buf))
    }
}

pub fn parse_body(data: &[u8]) -> Result<FeedBody> {
    let mut reader = Reader { data };
    let mut body = FeedBody::default();

    let deleted = reader.u32()?;
    for _ in 0..deleted {
        body.deleted.push(reader.i64()?);
    }
    let records = reader.u32()?;
    for _ in 0..records {
        let len = reader.u32()? as usize;
        body.records.push(serde_json::from_slice(reader.take(len)?)?);
    }
    if !reader.data.is_empty() {
        bail!("{} trailing bytes after feed body", reader.data.len());
    }
    Ok(body)
}

/// Blocking writer that pushes fixed-size chunks into a bounded channel.
///
/// Once the receiving side is gone every write fails with `BrokenPipe`.
pub struct ChannelWriter {
    sender: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
}

impl ChannelWriter {
    pub fn new(sender: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self {
            sender,
            buf: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(CHUNK_SIZE));
        self.sender
            .blocking_send(Ok(Bytes::from(chunk)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "feed client went away"))
    }

    /// Forwards a failure to the response stream, aborting it.
    pub fn fail(self, error: io::Error) {
        let _ = self.sender.blocking_send(Err(error));
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.sender.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "feed client went away",
            ));
        }
        let room = CHUNK_SIZE - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() == CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}
