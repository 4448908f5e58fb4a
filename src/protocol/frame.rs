//! Request frame decoding
//!
//! Turns the raw byte stream of a client connection into decoded commands:
//! non-empty lists of byte strings whose first element is the command name.
//!
//! Two request forms are accepted, as Redis accepts them:
//!
//! - multi-bulk: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`
//! - inline: `GET name\r\n`
//!
//! Decoding is incremental: `decode` returns `Ok(None)` until a whole frame is
//! buffered, and only then consumes its bytes. Arguments are split off the
//! read buffer without copying.

use crate::protocol::types::{prefix, CRLF};
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Maximum size for a single bulk argument (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of arguments in one command
pub const MAX_ARGUMENTS: usize = 1024 * 1024;

/// Maximum length of an inline command line
pub const MAX_INLINE_SIZE: usize = 64 * 1024;

/// Upper bound on argument slots reserved from a multi-bulk header alone
const PREALLOC_ARGUMENTS: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid {what} length: {value}")]
    InvalidLength { what: &'static str, value: String },

    #[error("expected '$', got {0:#04x}")]
    ExpectedBulk(u8),

    #[error("bulk argument missing trailing CRLF")]
    MissingCrlf,

    #[error("{what} too large: {size} (max: {max})")]
    TooLarge {
        what: &'static str,
        size: usize,
        max: usize,
    },

    #[error("invalid UTF-8 in inline command")]
    InvalidInline,
}

/// Decodes one command from the front of `buf`, if a complete one is present.
///
/// Blank inline lines and empty multi-bulk arrays are consumed and skipped.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, FrameError> {
    loop {
        if buf.is_empty() {
            return Ok(None);
        }
        let frame = if buf[0] == prefix::ARRAY {
            decode_multi_bulk(buf)?
        } else {
            decode_inline(buf)?
        };
        match frame {
            Some(args) if args.is_empty() => continue,
            other => return Ok(other),
        }
    }
}

fn decode_multi_bulk(buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, FrameError> {
    // Work out the full frame length before touching the buffer.
    let Some((count, header_len)) = read_length(buf, 1, "multi-bulk")? else {
        return Ok(None);
    };
    if count <= 0 {
        buf.advance(header_len);
        return Ok(Some(Vec::new()));
    }
    let count = count as usize;
    if count > MAX_ARGUMENTS {
        return Err(FrameError::TooLarge {
            what: "multi-bulk",
            size: count,
            max: MAX_ARGUMENTS,
        });
    }

    let mut spans = Vec::with_capacity(count.min(PREALLOC_ARGUMENTS));
    let mut pos = header_len;
    for _ in 0..count {
        if pos >= buf.len() {
            return Ok(None);
        }
        if buf[pos] != prefix::BULK_STRING {
            return Err(FrameError::ExpectedBulk(buf[pos]));
        }
        let Some((len, len_line)) = read_length(&buf[pos..], 1, "bulk")? else {
            return Ok(None);
        };
        if len < 0 {
            return Err(FrameError::InvalidLength {
                what: "bulk",
                value: len.to_string(),
            });
        }
        let len = len as usize;
        if len > MAX_BULK_SIZE {
            return Err(FrameError::TooLarge {
                what: "bulk",
                size: len,
                max: MAX_BULK_SIZE,
            });
        }
        let start = pos + len_line;
        if buf.len() < start + len + 2 {
            return Ok(None);
        }
        if &buf[start + len..start + len + 2] != CRLF {
            return Err(FrameError::MissingCrlf);
        }
        spans.push((start, len));
        pos = start + len + 2;
    }

    let mut frame = buf.split_to(pos).freeze();
    let mut args = Vec::with_capacity(spans.len());
    let mut consumed = 0;
    for (start, len) in spans {
        frame.advance(start - consumed);
        args.push(frame.split_to(len));
        consumed = start + len;
    }
    Ok(Some(args))
}

fn decode_inline(buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, FrameError> {
    let Some(end) = buf.iter().position(|b| *b == b'\n') else {
        if buf.len() > MAX_INLINE_SIZE {
            return Err(FrameError::TooLarge {
                what: "inline command",
                size: buf.len(),
                max: MAX_INLINE_SIZE,
            });
        }
        return Ok(None);
    };
    let line = buf.split_to(end + 1);
    let line = std::str::from_utf8(&line[..end]).map_err(|_| FrameError::InvalidInline)?;
    Ok(Some(
        line.split_whitespace()
            .map(|part| Bytes::copy_from_slice(part.as_bytes()))
            .collect(),
    ))
}

/// Reads `<prefix><integer>\r\n` starting at `buf[0]`.
///
/// Returns the integer and the number of bytes the line occupies.
fn read_length(
    buf: &[u8],
    skip: usize,
    what: &'static str,
) -> Result<Option<(i64, usize)>, FrameError> {
    let Some(crlf) = find_crlf(&buf[skip..]) else {
        return Ok(None);
    };
    let digits = &buf[skip..skip + crlf];
    let value = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| FrameError::InvalidLength {
            what,
            value: String::from_utf8_lossy(digits).into_owned(),
        })?;
    Ok(Some((value, skip + crlf + 2)))
}

#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}
