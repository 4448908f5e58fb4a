//! RESP (Redis Serialization Protocol) reply values
//!
//! Every type starts with a prefix byte and ends with CRLF:
//!
//! - `+` Simple String: `+OK\r\n`
//! - `-` Error: `-ERR unsupported command: foo\r\n`
//! - `:` Integer: `:1000\r\n`
//! - `$` Bulk String: `$5\r\nhello\r\n`, null as `$-1\r\n`
//! - `*` Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A value written back to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Serializes the value into its wire form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.to_vec()
    }

    /// Appends the wire form to `buf`, so several replies can share one write.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => encode_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => {
                // CR/LF would split the line
                let line: String = s
                    .chars()
                    .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
                    .collect();
                encode_line(buf, prefix::ERROR, line.as_bytes())
            }
            RespValue::Integer(n) => encode_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                encode_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            RespValue::Null => encode_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                encode_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.encode(buf);
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }
}

fn encode_line(buf: &mut BytesMut, prefix: u8, body: &[u8]) {
    buf.reserve(body.len() + 3);
    buf.put_u8(prefix);
    buf.put_slice(body);
    buf.put_slice(CRLF);
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) => {
                for (i, v) in values.iter().enumerate() {
                    writeln!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
        }
    }
}
