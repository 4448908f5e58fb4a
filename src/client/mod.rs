//! Storage Client Interface
//!
//! The gateway talks to the distributed storage engine only through the
//! traits in this module. The engine's sharding, replication and retry
//! behaviour stay behind them.
//!
//! ## Shape
//!
//! ```text
//!   ClientFactory ──build()──> StorageClient ──open_table()──> Table
//!                                   │
//!                                   └──new_session()──> Session
//!                                                          │
//!                               apply(WriteOp) ────────────┤ buffered
//!                               flush_async(callback) ─────┤ async, worker thread
//!                               read_async(ReadOp, callback)┘ async, worker thread
//! ```
//!
//! Completions are plain closures. They receive the operations back together
//! with the status, and may run on any thread the client chooses.

pub mod ops;
pub mod row;

pub use ops::{
    redis_schema, Mutation, Operation, ReadOp, ReadRequest, RedisResponse, ResponseCode,
    ResponseValue, Table, WriteOp, WriteRequest,
};
pub use row::{size_in_buffer, Cell, ColumnSchema, DataType, PartialRow, Schema};

use crate::error::{StorageError, StorageResult};
use crate::metrics::MetricRegistry;
use std::sync::Arc;
use std::time::Duration;

/// Continuation for an asynchronous read.
pub type ReadCallback = Box<dyn FnOnce(ReadOp, StorageResult<()>) + Send + 'static>;

/// Continuation for an asynchronous flush. Receives every flushed operation.
pub type FlushCallback = Box<dyn FnOnce(Vec<WriteOp>, StorageResult<()>) + Send + 'static>;

/// How a session submits applied writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Each `apply` is executed before it returns.
    #[default]
    AutoFlushSync,
    /// Writes are buffered until `flush_async` is called.
    ManualFlush,
}

/// A failure recorded against one operation of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpError {
    /// Display form of the failed operation.
    pub operation: String,
    pub status: StorageError,
}

/// Everything needed to construct a storage client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub client_name: String,
    pub master_addresses: Vec<String>,
    pub default_rpc_timeout: Duration,
    pub session_buffer_bytes: usize,
    pub metrics: Arc<MetricRegistry>,
}

/// Builds storage clients. Injected so tests can observe construction.
pub trait ClientFactory: Send + Sync {
    fn build(&self, options: &ClientOptions) -> StorageResult<Arc<dyn StorageClient>>;
}

/// A connected storage client.
pub trait StorageClient: Send + Sync {
    fn open_table(&self, name: &str) -> StorageResult<Arc<Table>>;

    fn new_session(&self, read_only: bool) -> Arc<dyn Session>;
}

/// A scoped unit of work against the storage client.
pub trait Session: Send + Sync {
    fn set_timeout(&self, timeout: Duration);

    fn set_flush_mode(&self, mode: FlushMode) -> StorageResult<()>;

    /// Adds a write to the session. Local only in manual flush mode.
    fn apply(&self, op: WriteOp) -> StorageResult<()>;

    /// Submits every buffered write. Returns immediately.
    fn flush_async(&self, done: FlushCallback);

    /// Submits a read. Returns immediately.
    fn read_async(&self, op: ReadOp, done: ReadCallback);

    /// Takes the per-operation errors collected so far, and whether some
    /// were dropped because the collector overflowed.
    fn drain_pending_errors(&self) -> (Vec<OpError>, bool);
}
