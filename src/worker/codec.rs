//! Line codec for worker stdout.
//!
//! Works like [`tokio_util::codec::LinesCodec`] with a maximum line length,
//! with two differences that matter for a noisy worker: invalid UTF-8 is
//! decoded lossily instead of failing, and an over-long line is discarded
//! (and logged) instead of ending the stream. Only real I/O errors surface
//! from the decoder.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::AppError;

/// Newline-delimited decoder with a per-line byte limit.
#[derive(Debug)]
pub struct WorkerLineCodec {
    max_length: usize,
    next_index: usize,
    discarding: bool,
}

impl WorkerLineCodec {
    /// Codec that drops lines longer than `max_length` bytes.
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Decoder for WorkerLineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, AppError> {
        loop {
            let read_to = buf.len().min(self.max_length.saturating_add(1));
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                    warn!(max_length = self.max_length, "discarded over-long worker output line");
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let index = self.next_index + offset;
                    self.next_index = 0;
                    let line = buf.split_to(index + 1);
                    return Ok(Some(to_line(&line[..index])));
                }
                (false, None) if buf.len() > self.max_length => {
                    self.discarding = true;
                    self.next_index = 0;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, AppError> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            buf.clear();
            return Ok(None);
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let line = buf.split_to(buf.len());
        Ok(Some(to_line(&line)))
    }
}

fn to_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
