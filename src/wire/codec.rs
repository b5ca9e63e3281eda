//! Newline-delimited JSON codec
//!
//! One message per line. serde_json never emits a raw `\n` inside a value, so
//! the newline is an unambiguous frame terminator. Blank lines are skipped.

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

/// Default frame limit, large enough for a batched upsert request
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;
pub const MAX_FRAME_BYTES_MIN: usize = 1024;
pub const MAX_FRAME_BYTES_MAX: usize = 256 * 1024 * 1024;

#[derive(Debug)]
pub enum WireError {
    Io(std::io::Error),
    /// A complete frame that is not a valid message
    Malformed(String),
    FrameTooLarge { limit: usize },
    /// Stream ended in the middle of a frame
    TruncatedFrame,
    /// Stream ended cleanly but without an end-of-stream frame
    MissingEnd,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Io(e) => write!(f, "transport error: {}", e),
            WireError::Malformed(msg) => write!(f, "malformed frame: {}", msg),
            WireError::FrameTooLarge { limit } => {
                write!(f, "frame exceeds {} bytes", limit)
            }
            WireError::TruncatedFrame => write!(f, "stream ended inside a frame"),
            WireError::MissingEnd => write!(f, "stream closed before the end-of-stream frame"),
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WireError {
    fn from(e: std::io::Error) -> Self {
        WireError::Io(e)
    }
}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        WireError::Malformed(e.to_string())
    }
}

/// Decodes `In` frames and encodes `Out` frames on one connection.
pub struct JsonLinesCodec<In, Out> {
    max_frame_bytes: usize,
    /// Bytes already scanned for a newline
    scanned: usize,
    _marker: PhantomData<fn(Out) -> In>,
}

impl<In, Out> JsonLinesCodec<In, Out> {
    pub fn new(max_frame_bytes: usize) -> Self {
        debug_assert!(
            (MAX_FRAME_BYTES_MIN..=MAX_FRAME_BYTES_MAX).contains(&max_frame_bytes),
            "Invariant: max_frame_bytes {} out of range",
            max_frame_bytes
        );
        JsonLinesCodec {
            max_frame_bytes,
            scanned: 0,
            _marker: PhantomData,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

impl<In, Out> Default for JsonLinesCodec<In, Out> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<In, Out> Clone for JsonLinesCodec<In, Out> {
    fn clone(&self) -> Self {
        Self::new(self.max_frame_bytes)
    }
}

#[inline]
fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

impl<In: DeserializeOwned, Out> Decoder for JsonLinesCodec<In, Out> {
    type Item = In;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<In>, WireError> {
        loop {
            let Some(pos) = memchr::memchr(b'\n', &src[self.scanned..]) else {
                if src.len() > self.max_frame_bytes {
                    return Err(WireError::FrameTooLarge {
                        limit: self.max_frame_bytes,
                    });
                }
                self.scanned = src.len();
                return Ok(None);
            };

            let end = self.scanned + pos;
            self.scanned = 0;
            if end > self.max_frame_bytes {
                return Err(WireError::FrameTooLarge {
                    limit: self.max_frame_bytes,
                });
            }

            let line = src.split_to(end + 1);
            let body = &line[..end];
            if is_blank(body) {
                continue;
            }
            return Ok(Some(serde_json::from_slice(body)?));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<In>, WireError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if is_blank(src) {
            src.advance(src.len());
            self.scanned = 0;
            Ok(None)
        } else {
            Err(WireError::TruncatedFrame)
        }
    }
}

impl<In, Out: Serialize> Encoder<Out> for JsonLinesCodec<In, Out> {
    type Error = WireError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), WireError> {
        let body = serde_json::to_vec(&item)?;
        if body.len() > self.max_frame_bytes {
            return Err(WireError::FrameTooLarge {
                limit: self.max_frame_bytes,
            });
        }
        dst.reserve(body.len() + 1);
        dst.put_slice(&body);
        dst.put_u8(b'\n');
        Ok(())
    }
}
