//! Per-command parse functions.
//!
//! Each function fills an operation's request body from the wire arguments
//! (command name at index 0). A rejection is an [`ArgumentError`] whose text
//! goes back to the client unchanged; nothing has reached storage yet.

use crate::client::{Mutation, ReadOp, ReadRequest, WriteOp, WriteRequest};
use crate::error::{ArgumentError, GatewayError};
use bytes::Bytes;
use std::time::{Duration, Instant};

pub type ParseResult = Result<(), GatewayError>;

/// Fills a read operation.
pub type ReadParseFn = fn(&mut ReadOp, &[Bytes]) -> ParseResult;

/// Fills a write operation.
pub type WriteParseFn = fn(&mut WriteOp, &[Bytes]) -> ParseResult;

const NOT_AN_INTEGER: &str = "value is not an integer or out of range";

/// SETRANGE offsets must leave room in a 512 MB string.
const MAX_OFFSET: i64 = 512 * 1024 * 1024;

fn arg(args: &[Bytes], idx: usize) -> Result<&Bytes, ArgumentError> {
    args.get(idx)
        .ok_or_else(|| ArgumentError::new(format!("missing argument {}", idx)))
}

fn integer(value: &[u8]) -> Result<i64, ArgumentError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ArgumentError::new(NOT_AN_INTEGER))
}

fn read(op: &mut ReadOp, request: ReadRequest) -> ParseResult {
    op.set_request(request)?;
    Ok(())
}

fn write(op: &mut WriteOp, request: WriteRequest) -> ParseResult {
    op.set_request(request)?;
    Ok(())
}

// ============================================================================
// Reads
// ============================================================================

/// GET key
pub fn parse_get(op: &mut ReadOp, args: &[Bytes]) -> ParseResult {
    let key = arg(args, 1)?.clone();
    read(op, ReadRequest::Get { key })
}

/// HGET key field
pub fn parse_hget(op: &mut ReadOp, args: &[Bytes]) -> ParseResult {
    let key = arg(args, 1)?.clone();
    let field = arg(args, 2)?.clone();
    read(op, ReadRequest::HGet { key, field })
}

/// STRLEN key
pub fn parse_strlen(op: &mut ReadOp, args: &[Bytes]) -> ParseResult {
    let key = arg(args, 1)?.clone();
    read(op, ReadRequest::StrLen { key })
}

/// EXISTS key
pub fn parse_exists(op: &mut ReadOp, args: &[Bytes]) -> ParseResult {
    let key = arg(args, 1)?.clone();
    read(op, ReadRequest::Exists { key })
}

/// GETRANGE key start end
pub fn parse_getrange(op: &mut ReadOp, args: &[Bytes]) -> ParseResult {
    let key = arg(args, 1)?.clone();
    let start = integer(arg(args, 2)?)?;
    let end = integer(arg(args, 3)?)?;
    read(op, ReadRequest::GetRange { key, start, end })
}

// ============================================================================
// Writes
// ============================================================================

/// SET key value [EX seconds | PX milliseconds]
pub fn parse_set(op: &mut WriteOp, args: &[Bytes]) -> ParseResult {
    let key = arg(args, 1)?.clone();
    let value = arg(args, 2)?.clone();

    let mut ttl = None;
    let mut i = 3;
    while i < args.len() {
        let to_duration: fn(u64) -> Duration = match args[i].to_ascii_uppercase().as_slice() {
            b"EX" => Duration::from_secs,
            b"PX" => Duration::from_millis,
            _ => return Err(ArgumentError::new("syntax error").into()),
        };
        if ttl.is_some() {
            return Err(ArgumentError::new("syntax error").into());
        }
        let amount = arg(args, i + 1).map_err(|_| ArgumentError::new("syntax error"))?;
        let amount = integer(amount)?;
        let expiry = u64::try_from(amount)
            .ok()
            .filter(|amount| *amount > 0)
            .map(to_duration)
            .filter(|ttl| Instant::now().checked_add(*ttl).is_some());
        let Some(expiry) = expiry else {
            return Err(ArgumentError::new("invalid expire time in 'set' command").into());
        };
        ttl = Some(expiry);
        i += 2;
    }

    let mut request = WriteRequest::new(key, Mutation::Set { value });
    request.ttl = ttl;
    write(op, request)
}

/// HSET key field value
pub fn parse_hset(op: &mut WriteOp, args: &[Bytes]) -> ParseResult {
    let key = arg(args, 1)?.clone();
    let field = arg(args, 2)?.clone();
    let value = arg(args, 3)?.clone();
    write(op, WriteRequest::new(key, Mutation::HSet { field, value }))
}

/// GETSET key value
pub fn parse_getset(op: &mut WriteOp, args: &[Bytes]) -> ParseResult {
    let key = arg(args, 1)?.clone();
    let value = arg(args, 2)?.clone();
    write(op, WriteRequest::new(key, Mutation::GetSet { value }))
}

/// APPEND key value
pub fn parse_append(op: &mut WriteOp, args: &[Bytes]) -> ParseResult {
    let key = arg(args, 1)?.clone();
    let value = arg(args, 2)?.clone();
    write(op, WriteRequest::new(key, Mutation::Append { value }))
}

/// DEL key
pub fn parse_del(op: &mut WriteOp, args: &[Bytes]) -> ParseResult {
    let key = arg(args, 1)?.clone();
    write(op, WriteRequest::new(key, Mutation::Del))
}

/// SETRANGE key offset value
pub fn parse_setrange(op: &mut WriteOp, args: &[Bytes]) -> ParseResult {
    let key = arg(args, 1)?.clone();
    let offset = integer(arg(args, 2)?)?;
    if !(0..MAX_OFFSET).contains(&offset) {
        return Err(ArgumentError::new("offset is out of range").into());
    }
    let value = arg(args, 3)?.clone();
    write(
        op,
        WriteRequest::new(
            key,
            Mutation::SetRange {
                offset: offset as usize,
                value,
            },
        ),
    )
}

/// INCR key
pub fn parse_incr(op: &mut WriteOp, args: &[Bytes]) -> ParseResult {
    let key = arg(args, 1)?.clone();
    write(op, WriteRequest::new(key, Mutation::Incr { delta: 1 }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{redis_schema, Table};
    use std::sync::Arc;

    fn table() -> Arc<Table> {
        Arc::new(Table::new(".redis", redis_schema().unwrap(), 1))
    }

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts
            .iter()
            .map(|s| Bytes::copy_from_slice(s.as_bytes()))
            .collect()
    }

    fn parse_write(f: WriteParseFn, parts: &[&str]) -> Result<WriteRequest, String> {
        let mut op = table().new_redis_write();
        f(&mut op, &args(parts)).map_err(|e| e.client_message())?;
        Ok(op.request().cloned().unwrap())
    }

    #[test]
    fn test_parse_get() {
        let mut op = table().new_redis_read();
        parse_get(&mut op, &args(&["get", "name"])).unwrap();
        assert_eq!(
            op.request(),
            Some(&ReadRequest::Get {
                key: Bytes::from_static(b"name")
            })
        );
    }

    #[test]
    fn test_parse_getrange() {
        let mut op = table().new_redis_read();
        parse_getrange(&mut op, &args(&["getrange", "k", "-3", "10"])).unwrap();
        assert_eq!(
            op.request(),
            Some(&ReadRequest::GetRange {
                key: Bytes::from_static(b"k"),
                start: -3,
                end: 10
            })
        );

        let mut op = table().new_redis_read();
        let err = parse_getrange(&mut op, &args(&["getrange", "k", "a", "1"])).unwrap_err();
        assert_eq!(err.client_message(), NOT_AN_INTEGER);
        assert!(op.request().is_none());
    }

    #[test]
    fn test_parse_set_options() {
        let plain = parse_write(parse_set, &["set", "k", "v"]).unwrap();
        assert_eq!(plain.ttl, None);

        let ex = parse_write(parse_set, &["SET", "k", "v", "ex", "10"]).unwrap();
        assert_eq!(ex.ttl, Some(Duration::from_secs(10)));

        let px = parse_write(parse_set, &["SET", "k", "v", "PX", "250"]).unwrap();
        assert_eq!(px.ttl, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_parse_set_rejections() {
        assert_eq!(
            parse_write(parse_set, &["set", "k", "v", "NX"]).unwrap_err(),
            "syntax error"
        );
        assert_eq!(
            parse_write(parse_set, &["set", "k", "v", "EX"]).unwrap_err(),
            "syntax error"
        );
        assert_eq!(
            parse_write(parse_set, &["set", "k", "v", "EX", "1", "PX", "5"]).unwrap_err(),
            "syntax error"
        );
        assert_eq!(
            parse_write(parse_set, &["set", "k", "v", "EX", "0"]).unwrap_err(),
            "invalid expire time in 'set' command"
        );
        assert_eq!(
            parse_write(parse_set, &["set", "k", "v", "PX", "soon"]).unwrap_err(),
            NOT_AN_INTEGER
        );
    }

    #[test]
    fn test_parse_set_unrepresentable_expiry() {
        for unit in ["EX", "PX"] {
            assert_eq!(
                parse_write(parse_set, &["set", "k", "v", unit, "9223372036854775807"])
                    .unwrap_err(),
                "invalid expire time in 'set' command",
                "{}",
                unit
            );
        }
        assert_eq!(
            parse_write(parse_set, &["set", "k", "v", "EX", "-5"]).unwrap_err(),
            "invalid expire time in 'set' command"
        );
    }

    #[test]
    fn test_parse_setrange() {
        let req = parse_write(parse_setrange, &["setrange", "k", "6", "Redis"]).unwrap();
        assert_eq!(
            req.mutation,
            Mutation::SetRange {
                offset: 6,
                value: Bytes::from_static(b"Redis")
            }
        );
        assert_eq!(
            parse_write(parse_setrange, &["setrange", "k", "-1", "x"]).unwrap_err(),
            "offset is out of range"
        );
    }

    #[test]
    fn test_parse_simple_writes() {
        assert_eq!(
            parse_write(parse_incr, &["incr", "n"]).unwrap().mutation,
            Mutation::Incr { delta: 1 }
        );
        assert_eq!(
            parse_write(parse_del, &["del", "n"]).unwrap().mutation,
            Mutation::Del
        );
        assert_eq!(
            parse_write(parse_hset, &["hset", "h", "f", "v"])
                .unwrap()
                .mutation,
            Mutation::HSet {
                field: Bytes::from_static(b"f"),
                value: Bytes::from_static(b"v")
            }
        );
    }

    #[test]
    fn test_missing_argument() {
        let mut op = table().new_redis_read();
        let err = parse_hget(&mut op, &args(&["hget", "k"])).unwrap_err();
        assert_eq!(err.client_message(), "missing argument 2");
    }
}
