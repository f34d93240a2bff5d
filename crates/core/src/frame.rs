//! The Frame Reader (spec §4.1): yields the next self-delimited JSON
//! object off a raw byte stream, or signals end-of-stream.
//!
//! Mirrors the teacher's `Bc::deserialize`, which parses as much of an
//! accumulation buffer as forms one complete object and advances the
//! buffer by exactly that many bytes, leaving the remainder for the
//! next call. Here the "parser" is a string-aware balanced-brace scan
//! rather than `nom` combinators, since the wire format is JSON text,
//! not a fixed-width binary header.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{MslError, MslErrorKind, Result};

/// Scans `buf` for one complete, balanced `{...}` JSON object starting
/// at the first non-whitespace byte.
///
/// Returns `Ok(Some(len))` with the number of bytes the object
/// occupies (including leading whitespace skipped to find it) if a
/// complete object is present, `Ok(None)` if `buf` holds only a
/// (possibly empty) prefix of one, or `Err` if the bytes present could
/// never form a valid object (e.g. the first non-whitespace byte is
/// not `{`).
fn scan_object(buf: &[u8]) -> Result<Option<usize>> {
    let start = match buf.iter().position(|b| !b.is_ascii_whitespace()) {
        Some(i) => i,
        None => return Ok(None),
    };
    if buf[start] != b'{' {
        return Err(MslError::new(MslErrorKind::MessageFormatError));
    }

    let mut depth: u32 = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in buf[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(Some(start + i + 1));
                }
            }
            _ => {}
        }
    }
    Ok(None)
}

/// Pulls successive JSON objects out of an [`AsyncRead`] byte source.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps a byte source.
    pub fn new(inner: R) -> Self {
        FrameReader {
            inner,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Reads the next object, or `Ok(None)` at end-of-stream.
    ///
    /// End-of-stream is only reported once the underlying source
    /// signals EOF *and* no partial object remains buffered; a
    /// well-formed prefix with the source exhausted is a fatal parse
    /// error with no message ID (spec §4.1).
    pub async fn next_frame(&mut self) -> Result<Option<serde_json::Value>> {
        loop {
            if let Some(len) = scan_object(&self.buf)? {
                let bytes = self.buf.split_to(len);
                let start = bytes
                    .iter()
                    .position(|b| !b.is_ascii_whitespace())
                    .unwrap_or(0);
                let value: serde_json::Value = serde_json::from_slice(&bytes[start..])
                    .map_err(|e| MslError::new(MslErrorKind::JsonParseError).with_source(e))?;
                return Ok(Some(value));
            }

            let mut chunk = [0u8; 4096];
            let n = self
                .inner
                .read(&mut chunk)
                .await
                .map_err(|e| MslError::new(MslErrorKind::MessageFormatError).with_source(e))?;
            if n == 0 {
                if self.buf.iter().all(|b| b.is_ascii_whitespace()) {
                    self.buf.clear();
                    return Ok(None);
                }
                return Err(MslError::new(MslErrorKind::MessageFormatError));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Bytes buffered but not yet consumed by a complete object.
    pub fn buffered_len(&self) -> usize {
        self.buf.remaining()
    }
}
