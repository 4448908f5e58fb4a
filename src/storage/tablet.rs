//! Tablets: one hash partition of a table.
//!
//! Each tablet is a `RwLock<HashMap>` of entries with optional expiry. Reads
//! take the read lock and treat expired entries as absent; writes take the
//! write lock and drop an expired entry before acting on the key.

use crate::client::{Mutation, ReadRequest, RedisResponse, ResponseCode, WriteRequest};
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Largest string a write may produce (512 MB, same as Redis).
pub const MAX_STRING_LEN: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(Bytes),
    Hash(HashMap<Bytes, Bytes>),
}

/// A stored value with optional expiry time.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub expires_at: Option<Instant>,
}

impl Entry {
    pub fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
pub struct Tablet {
    data: RwLock<HashMap<Bytes, Entry>>,
    expired: AtomicU64,
}

impl Tablet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, request: &ReadRequest) -> RedisResponse {
        let data = self.data.read();
        let value = data
            .get(request.key())
            .filter(|entry| !entry.is_expired())
            .map(|entry| &entry.value);

        match (request, value) {
            (ReadRequest::Exists { .. }, v) => RedisResponse::int(v.is_some() as i64),

            (ReadRequest::Get { .. }, Some(Value::String(s))) => RedisResponse::string(s.clone()),
            (ReadRequest::Get { .. }, None) => RedisResponse::not_found(),

            (ReadRequest::HGet { field, .. }, Some(Value::Hash(h))) => match h.get(field) {
                Some(v) => RedisResponse::string(v.clone()),
                None => RedisResponse::not_found(),
            },
            (ReadRequest::HGet { .. }, None) => RedisResponse::not_found(),

            (ReadRequest::StrLen { .. }, Some(Value::String(s))) => {
                RedisResponse::int(s.len() as i64)
            }
            (ReadRequest::StrLen { .. }, None) => RedisResponse::int(0),

            (ReadRequest::GetRange { start, end, .. }, Some(Value::String(s))) => {
                RedisResponse::string(substring(s, *start, *end))
            }
            (ReadRequest::GetRange { .. }, None) => RedisResponse::string(Bytes::new()),

            _ => RedisResponse::with_code(ResponseCode::WrongType),
        }
    }

    pub fn write(&self, request: &WriteRequest) -> RedisResponse {
        let mut data = self.data.write();
        let key = &request.key;
        if data.get(key).is_some_and(Entry::is_expired) {
            data.remove(key);
            self.expired.fetch_add(1, Ordering::Relaxed);
        }

        match &request.mutation {
            Mutation::Set { value } => {
                data.insert(
                    key.clone(),
                    Entry::new(Value::String(value.clone()), request.ttl),
                );
                RedisResponse::ok()
            }

            Mutation::GetSet { value } => {
                let previous = match data.get(key).map(|e| &e.value) {
                    Some(Value::Hash(_)) => {
                        return RedisResponse::with_code(ResponseCode::WrongType)
                    }
                    Some(Value::String(old)) => RedisResponse::string(old.clone()),
                    None => RedisResponse::not_found(),
                };
                data.insert(key.clone(), Entry::new(Value::String(value.clone()), None));
                previous
            }

            Mutation::HSet { field, value } => match data.get_mut(key) {
                Some(Entry {
                    value: Value::Hash(hash),
                    ..
                }) => {
                    let added = hash.insert(field.clone(), value.clone()).is_none();
                    RedisResponse::int(added as i64)
                }
                Some(_) => RedisResponse::with_code(ResponseCode::WrongType),
                None => {
                    let hash = HashMap::from([(field.clone(), value.clone())]);
                    data.insert(key.clone(), Entry::new(Value::Hash(hash), request.ttl));
                    RedisResponse::int(1)
                }
            },

            Mutation::Append { value } => match data.get_mut(key) {
                Some(Entry {
                    value: Value::String(current),
                    ..
                }) => {
                    if current.len() + value.len() > MAX_STRING_LEN {
                        return RedisResponse::with_code(ResponseCode::OutOfRange);
                    }
                    let mut joined = BytesMut::with_capacity(current.len() + value.len());
                    joined.extend_from_slice(current);
                    joined.extend_from_slice(value);
                    *current = joined.freeze();
                    RedisResponse::int(current.len() as i64)
                }
                Some(_) => RedisResponse::with_code(ResponseCode::WrongType),
                None => {
                    data.insert(
                        key.clone(),
                        Entry::new(Value::String(value.clone()), request.ttl),
                    );
                    RedisResponse::int(value.len() as i64)
                }
            },

            Mutation::Del => RedisResponse::int(data.remove(key).is_some() as i64),

            Mutation::SetRange { offset, value } => {
                let current = match data.get(key).map(|e| &e.value) {
                    Some(Value::Hash(_)) => {
                        return RedisResponse::with_code(ResponseCode::WrongType)
                    }
                    Some(Value::String(s)) => Some(s),
                    None => None,
                };
                if value.is_empty() {
                    return RedisResponse::int(current.map_or(0, |s| s.len()) as i64);
                }
                let Some(end) = offset.checked_add(value.len()).filter(|e| *e <= MAX_STRING_LEN)
                else {
                    return RedisResponse::with_code(ResponseCode::OutOfRange);
                };
                let mut buf = BytesMut::from(current.map_or(&b""[..], |s| &s[..]));
                if buf.len() < end {
                    buf.resize(end, 0);
                }
                buf[*offset..end].copy_from_slice(value);
                let len = buf.len();
                match data.get_mut(key) {
                    Some(entry) => entry.value = Value::String(buf.freeze()),
                    None => {
                        data.insert(
                            key.clone(),
                            Entry::new(Value::String(buf.freeze()), request.ttl),
                        );
                    }
                }
                RedisResponse::int(len as i64)
            }

            Mutation::Incr { delta } => {
                let current = match data.get(key).map(|e| &e.value) {
                    Some(Value::Hash(_)) => {
                        return RedisResponse::with_code(ResponseCode::WrongType)
                    }
                    Some(Value::String(s)) => match parse_integer(s) {
                        Some(n) => n,
                        None => return RedisResponse::with_code(ResponseCode::NotAnInteger),
                    },
                    None => 0,
                };
                let Some(updated) = current.checked_add(*delta) else {
                    return RedisResponse::with_code(ResponseCode::NotAnInteger);
                };
                let value = Value::String(Bytes::from(updated.to_string()));
                match data.get_mut(key) {
                    // Keeps the TTL
                    Some(entry) => entry.value = value,
                    None => {
                        data.insert(key.clone(), Entry::new(value, request.ttl));
                    }
                }
                RedisResponse::int(updated)
            }
        }
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn cleanup_expired(&self) -> u64 {
        let mut data = self.data.write();
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired());
        let removed = (before - data.len()) as u64;
        self.expired.fetch_add(removed, Ordering::Relaxed);
        removed
    }

    /// Number of stored entries, expired ones not yet removed included.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn expired_count(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }
}

/// Inclusive `[start, end]` slice with negative indices counting from the end.
fn substring(s: &Bytes, start: i64, end: i64) -> Bytes {
    let len = s.len() as i64;
    if len == 0 {
        return Bytes::new();
    }
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if end < 0 || start > end {
        return Bytes::new();
    }
    s.slice(start as usize..=end as usize)
}

fn parse_integer(s: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(s).ok()?;
    // Redis rejects leading '+' and surrounding whitespace
    if s.starts_with('+') || s.trim() != s {
        return None;
    }
    s.parse().ok()
}
