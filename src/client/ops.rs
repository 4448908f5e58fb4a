//! Typed operations against a table.
//!
//! An operation carries its request body in, and after the storage client
//! completes it, a response body out. Operations are moved into a session
//! and handed back to the completion, so exactly one owner exists at a time.

use crate::client::row::{size_in_buffer, ColumnSchema, DataType, PartialRow, Schema};
use crate::error::StorageResult;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Column holding the Redis key.
pub const KEY_COLUMN: &str = "key";
/// Column holding the value being written, when the mutation carries one.
pub const VALUE_COLUMN: &str = "value";
/// Column holding the TTL in milliseconds, when one was requested.
pub const TTL_COLUMN: &str = "ttl_ms";

/// Schema of the table backing the Redis commands.
pub fn redis_schema() -> StorageResult<Schema> {
    Schema::new(
        vec![
            ColumnSchema::new(KEY_COLUMN, DataType::Binary),
            ColumnSchema::new(VALUE_COLUMN, DataType::Binary).nullable(),
            ColumnSchema::new(TTL_COLUMN, DataType::Int64).nullable(),
        ],
        1,
    )
}

/// An open table handle, shared read-only by every operation against it.
#[derive(Debug)]
pub struct Table {
    name: String,
    schema: Arc<Schema>,
    num_tablets: usize,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: Schema, num_tablets: usize) -> Self {
        Self {
            name: name.into(),
            schema: Arc::new(schema),
            num_tablets,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn num_tablets(&self) -> usize {
        self.num_tablets
    }

    pub fn new_redis_read(self: &Arc<Self>) -> ReadOp {
        ReadOp {
            table: Arc::clone(self),
            row: PartialRow::new(Arc::clone(&self.schema)),
            request: None,
            response: None,
        }
    }

    pub fn new_redis_write(self: &Arc<Self>) -> WriteOp {
        WriteOp {
            table: Arc::clone(self),
            row: PartialRow::new(Arc::clone(&self.schema)),
            request: None,
            response: None,
        }
    }
}

/// Read request bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadRequest {
    Get { key: Bytes },
    HGet { key: Bytes, field: Bytes },
    StrLen { key: Bytes },
    Exists { key: Bytes },
    /// Inclusive range; negative indices count from the end.
    GetRange { key: Bytes, start: i64, end: i64 },
}

impl ReadRequest {
    pub fn key(&self) -> &Bytes {
        match self {
            ReadRequest::Get { key }
            | ReadRequest::HGet { key, .. }
            | ReadRequest::StrLen { key }
            | ReadRequest::Exists { key }
            | ReadRequest::GetRange { key, .. } => key,
        }
    }
}

/// The change a write request makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Set { value: Bytes },
    HSet { field: Bytes, value: Bytes },
    GetSet { value: Bytes },
    Append { value: Bytes },
    Del,
    SetRange { offset: usize, value: Bytes },
    Incr { delta: i64 },
}

impl Mutation {
    fn value(&self) -> Option<&Bytes> {
        match self {
            Mutation::Set { value }
            | Mutation::HSet { value, .. }
            | Mutation::GetSet { value }
            | Mutation::Append { value }
            | Mutation::SetRange { value, .. } => Some(value),
            Mutation::Del | Mutation::Incr { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub key: Bytes,
    pub mutation: Mutation,
    pub ttl: Option<Duration>,
}

impl WriteRequest {
    pub fn new(key: Bytes, mutation: Mutation) -> Self {
        Self {
            key,
            mutation,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Outcome code carried in a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseCode {
    #[default]
    Ok,
    NotFound,
    WrongType,
    NotAnInteger,
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResponseValue {
    #[default]
    None,
    Status(&'static str),
    String(Bytes),
    Int(i64),
}

/// Response body of a completed Redis operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RedisResponse {
    pub code: ResponseCode,
    pub value: ResponseValue,
}

impl RedisResponse {
    pub fn ok() -> Self {
        Self {
            code: ResponseCode::Ok,
            value: ResponseValue::Status("OK"),
        }
    }

    pub fn string(value: impl Into<Bytes>) -> Self {
        Self {
            code: ResponseCode::Ok,
            value: ResponseValue::String(value.into()),
        }
    }

    pub fn int(value: i64) -> Self {
        Self {
            code: ResponseCode::Ok,
            value: ResponseValue::Int(value),
        }
    }

    pub fn not_found() -> Self {
        Self::with_code(ResponseCode::NotFound)
    }

    pub fn with_code(code: ResponseCode) -> Self {
        Self {
            code,
            value: ResponseValue::None,
        }
    }
}

/// Behaviour shared by read and write operations.
pub trait Operation: fmt::Display {
    fn table(&self) -> &Arc<Table>;

    fn row(&self) -> &PartialRow;

    /// Estimated encoded size of this operation's row.
    fn size_in_buffer(&self) -> usize {
        size_in_buffer(self.row())
    }
}

/// A pending read against the table.
#[derive(Debug)]
pub struct ReadOp {
    table: Arc<Table>,
    row: PartialRow,
    request: Option<ReadRequest>,
    response: Option<RedisResponse>,
}

impl ReadOp {
    /// Sets the request and keys the row with it.
    pub fn set_request(&mut self, request: ReadRequest) -> StorageResult<()> {
        self.row.set_binary(0, request.key().clone())?;
        self.request = Some(request);
        Ok(())
    }

    pub fn request(&self) -> Option<&ReadRequest> {
        self.request.as_ref()
    }

    pub fn response(&self) -> Option<&RedisResponse> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: RedisResponse) {
        self.response = Some(response);
    }

    pub fn into_response(self) -> Option<RedisResponse> {
        self.response
    }
}

impl Operation for ReadOp {
    fn table(&self) -> &Arc<Table> {
        &self.table
    }

    fn row(&self) -> &PartialRow {
        &self.row
    }
}

impl fmt::Display for ReadOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.request {
            Some(req) => write!(f, "REDIS_READ {}", String::from_utf8_lossy(req.key())),
            None => write!(f, "REDIS_READ <empty>"),
        }
    }
}

/// A pending write against the table.
#[derive(Debug)]
pub struct WriteOp {
    table: Arc<Table>,
    row: PartialRow,
    request: Option<WriteRequest>,
    response: Option<RedisResponse>,
}

impl WriteOp {
    /// Sets the request and mirrors key, value and TTL into the row.
    pub fn set_request(&mut self, request: WriteRequest) -> StorageResult<()> {
        let schema = Arc::clone(self.table.schema());
        self.row.set_binary(0, request.key.clone())?;
        if let Some(idx) = schema.find_column(VALUE_COLUMN) {
            match request.mutation.value() {
                Some(value) => self.row.set_binary(idx, value.clone())?,
                None => self.row.unset(idx)?,
            }
        }
        if let Some(idx) = schema.find_column(TTL_COLUMN) {
            match request.ttl {
                Some(ttl) => self
                    .row
                    .set_int64(idx, ttl.as_millis().min(i64::MAX as u128) as i64)?,
                None => self.row.unset(idx)?,
            }
        }
        self.request = Some(request);
        Ok(())
    }

    pub fn request(&self) -> Option<&WriteRequest> {
        self.request.as_ref()
    }

    pub fn response(&self) -> Option<&RedisResponse> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: RedisResponse) {
        self.response = Some(response);
    }

    pub fn into_response(self) -> Option<RedisResponse> {
        self.response
    }
}

impl Operation for WriteOp {
    fn table(&self) -> &Arc<Table> {
        &self.table
    }

    fn row(&self) -> &PartialRow {
        &self.row
    }
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.request {
            Some(req) => write!(f, "REDIS_WRITE {}", String::from_utf8_lossy(&req.key)),
            None => write!(f, "REDIS_WRITE <empty>"),
        }
    }
}
