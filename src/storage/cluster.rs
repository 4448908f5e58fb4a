//! In-process storage cluster
//!
//! A [`LocalCluster`] owns named tables, each hash-partitioned into
//! [`Tablet`]s. It implements the storage-client interface so the gateway runs
//! without an external deployment, and exposes fault injection and counters
//! so tests can observe exactly what reached storage.
//!
//! ```text
//!   LocalConnector ──build()──> LocalClient ──new_session()──> LocalSession
//!         │                         │                              │
//!         └──────────── Arc<ClusterInner> ◄────────────────────────┘
//!                           │
//!               tables: name -> [Tablet; N]
//! ```
//!
//! Asynchronous reads and flushes run as tasks on the tokio runtime that was
//! current when the client was built, so completions arrive on its worker
//! threads.

use crate::client::{
    redis_schema, ClientFactory, ClientOptions, FlushCallback, FlushMode, OpError, Operation,
    ReadCallback, ReadOp, Session, StorageClient, Table, WriteOp,
};
use crate::error::{StorageError, StorageResult};
use crate::metrics::Histogram;
use crate::storage::tablet::Tablet;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, trace};

/// Per-operation errors kept by a session before further ones are dropped.
pub const MAX_PENDING_ERRORS: usize = 1000;

/// Counters describing what reached the cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterStats {
    pub connects: u64,
    pub tables_opened: u64,
    pub sessions_opened: u64,
    pub reads: u64,
    pub writes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicU64,
    tables_opened: AtomicU64,
    sessions_opened: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: AtomicBool,
    fail_writes: AtomicBool,
    latency_us: AtomicU64,
}

struct LocalTable {
    table: Arc<Table>,
    tablets: Vec<Tablet>,
}

impl LocalTable {
    fn tablet_for(&self, key: &[u8]) -> &Tablet {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.tablets[(hasher.finish() as usize) % self.tablets.len()]
    }
}

struct ClusterInner {
    masters: Vec<String>,
    tables: RwLock<HashMap<String, Arc<LocalTable>>>,
    faults: Faults,
    counters: Counters,
}

impl ClusterInner {
    fn check_reachable(&self) -> StorageResult<()> {
        if self.faults.unreachable.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable(
                "cluster is unreachable".to_string(),
            ));
        }
        Ok(())
    }

    fn latency(&self) -> Duration {
        Duration::from_micros(self.faults.latency_us.load(Ordering::Relaxed))
    }

    fn lookup(&self, name: &str) -> StorageResult<Arc<LocalTable>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("table {} does not exist", name)))
    }

    fn execute_read(&self, op: &mut ReadOp) -> StorageResult<()> {
        self.check_reachable()?;
        let table = self.lookup(op.table().name())?;
        let response = {
            let request = op.request().ok_or_else(|| {
                StorageError::InvalidArgument("read operation has no request".to_string())
            })?;
            table.tablet_for(request.key()).read(request)
        };
        op.set_response(response);
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn execute_write(&self, op: &mut WriteOp) -> StorageResult<()> {
        self.check_reachable()?;
        if self.faults.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::IoError("write rejected by tablet".to_string()));
        }
        let table = self.lookup(op.table().name())?;
        let response = {
            let request = op.request().ok_or_else(|| {
                StorageError::InvalidArgument("write operation has no request".to_string())
            })?;
            table.tablet_for(&request.key).write(request)
        };
        op.set_response(response);
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// An in-process storage cluster. Cloning shares the same cluster.
#[derive(Clone)]
pub struct LocalCluster {
    inner: Arc<ClusterInner>,
}

impl LocalCluster {
    /// Creates an empty cluster whose masters listen on `masters`.
    pub fn new<I, S>(masters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(ClusterInner {
                masters: masters.into_iter().map(Into::into).collect(),
                tables: RwLock::new(HashMap::new()),
                faults: Faults::default(),
                counters: Counters::default(),
            }),
        }
    }

    /// Creates a table with the Redis schema split into `tablets` partitions.
    pub fn create_table(&self, name: &str, tablets: usize) -> StorageResult<()> {
        if tablets == 0 {
            return Err(StorageError::InvalidArgument(
                "a table needs at least one tablet".to_string(),
            ));
        }
        let mut tables = self.inner.tables.write();
        if tables.contains_key(name) {
            return Err(StorageError::IllegalState(format!(
                "table {} already exists",
                name
            )));
        }
        let table = Arc::new(Table::new(name, redis_schema()?, tablets));
        tables.insert(
            name.to_string(),
            Arc::new(LocalTable {
                table,
                tablets: (0..tablets).map(|_| Tablet::new()).collect(),
            }),
        );
        info!(table = name, tablets, "Created table");
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> bool {
        self.inner.tables.write().remove(name).is_some()
    }

    /// A client factory connected to this cluster.
    pub fn connector(&self) -> LocalConnector {
        LocalConnector {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn master_addresses(&self) -> &[String] {
        &self.inner.masters
    }

    /// Makes every new connection and every operation fail as unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner
            .faults
            .unreachable
            .store(unreachable, Ordering::Relaxed);
    }

    /// Makes every write operation fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.faults.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Delay added before each asynchronous read or flush executes.
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .faults
            .latency_us
            .store(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ClusterStats {
        let c = &self.inner.counters;
        ClusterStats {
            connects: c.connects.load(Ordering::Relaxed),
            tables_opened: c.tables_opened.load(Ordering::Relaxed),
            sessions_opened: c.sessions_opened.load(Ordering::Relaxed),
            reads: c.reads.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
        }
    }

    /// Number of stored entries across all tables.
    pub fn len(&self) -> u64 {
        self.inner
            .tables
            .read()
            .values()
            .flat_map(|t| t.tablets.iter())
            .map(|tablet| tablet.len() as u64)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes expired entries from every tablet.
    pub fn cleanup_expired(&self) -> u64 {
        let tables: Vec<_> = self.inner.tables.read().values().cloned().collect();
        tables
            .iter()
            .flat_map(|t| t.tablets.iter())
            .map(Tablet::cleanup_expired)
            .sum()
    }
}

impl std::fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCluster")
            .field("masters", &self.inner.masters)
            .field("tables", &self.inner.tables.read().len())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Builds clients connected to a [`LocalCluster`].
#[derive(Clone)]
pub struct LocalConnector {
    inner: Arc<ClusterInner>,
}

impl ClientFactory for LocalConnector {
    fn build(&self, options: &ClientOptions) -> StorageResult<Arc<dyn StorageClient>> {
        self.inner.check_reachable()?;
        if !options
            .master_addresses
            .iter()
            .any(|addr| self.inner.masters.contains(addr))
        {
            return Err(StorageError::Unavailable(format!(
                "no master reachable at [{}]",
                options.master_addresses.join(", ")
            )));
        }
        let runtime = Handle::try_current().map_err(|e| {
            StorageError::IllegalState(format!("storage client needs a tokio runtime: {}", e))
        })?;

        self.inner.counters.connects.fetch_add(1, Ordering::Relaxed);
        debug!(
            client = %options.client_name,
            masters = ?options.master_addresses,
            "Storage client connected"
        );
        Ok(Arc::new(LocalClient {
            inner: Arc::clone(&self.inner),
            runtime,
            default_timeout: options.default_rpc_timeout,
            buffer_limit: options.session_buffer_bytes,
            buffer_bytes: options.metrics.histogram("write_buffer_bytes"),
        }))
    }
}

struct LocalClient {
    inner: Arc<ClusterInner>,
    runtime: Handle,
    default_timeout: Duration,
    buffer_limit: usize,
    buffer_bytes: Arc<Histogram>,
}

impl StorageClient for LocalClient {
    fn open_table(&self, name: &str) -> StorageResult<Arc<Table>> {
        self.inner.check_reachable()?;
        let table = self.inner.lookup(name)?;
        self.inner
            .counters
            .tables_opened
            .fetch_add(1, Ordering::Relaxed);
        Ok(Arc::clone(&table.table))
    }

    fn new_session(&self, read_only: bool) -> Arc<dyn Session> {
        self.inner
            .counters
            .sessions_opened
            .fetch_add(1, Ordering::Relaxed);
        Arc::new(LocalSession {
            inner: Arc::clone(&self.inner),
            runtime: self.runtime.clone(),
            read_only,
            buffer_limit: self.buffer_limit,
            buffer_bytes: Arc::clone(&self.buffer_bytes),
            state: Mutex::new(SessionState {
                timeout: self.default_timeout,
                flush_mode: FlushMode::default(),
                buffer: Vec::new(),
                buffered: 0,
            }),
            errors: Arc::new(ErrorCollector::new(MAX_PENDING_ERRORS)),
        })
    }
}

struct SessionState {
    timeout: Duration,
    flush_mode: FlushMode,
    buffer: Vec<WriteOp>,
    buffered: usize,
}

/// Bounded collection of per-operation errors.
#[derive(Debug)]
pub struct ErrorCollector {
    capacity: usize,
    state: Mutex<(Vec<OpError>, bool)>,
}

impl ErrorCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new((Vec::new(), false)),
        }
    }

    pub fn record(&self, operation: String, status: StorageError) {
        let mut state = self.state.lock();
        if state.0.len() >= self.capacity {
            state.1 = true;
            return;
        }
        state.0.push(OpError { operation, status });
    }

    pub fn drain(&self) -> (Vec<OpError>, bool) {
        let mut state = self.state.lock();
        let overflowed = std::mem::replace(&mut state.1, false);
        (std::mem::take(&mut state.0), overflowed)
    }
}

struct LocalSession {
    inner: Arc<ClusterInner>,
    runtime: Handle,
    read_only: bool,
    buffer_limit: usize,
    buffer_bytes: Arc<Histogram>,
    state: Mutex<SessionState>,
    errors: Arc<ErrorCollector>,
}

/// Runs the buffered writes, recording each failure against the session.
fn flush_ops(
    inner: &ClusterInner,
    errors: &ErrorCollector,
    ops: &mut [WriteOp],
) -> StorageResult<()> {
    let mut failed = 0;
    for op in ops.iter_mut() {
        if let Err(e) = inner.execute_write(op) {
            errors.record(op.to_string(), e);
            failed += 1;
        }
    }
    if failed > 0 {
        return Err(StorageError::IoError(format!(
            "{} of {} operations failed",
            failed,
            ops.len()
        )));
    }
    Ok(())
}

impl Session for LocalSession {
    fn set_timeout(&self, timeout: Duration) {
        self.state.lock().timeout = timeout;
    }

    fn set_flush_mode(&self, mode: FlushMode) -> StorageResult<()> {
        let mut state = self.state.lock();
        if !state.buffer.is_empty() {
            return Err(StorageError::IllegalState(
                "cannot change flush mode with buffered operations".to_string(),
            ));
        }
        state.flush_mode = mode;
        Ok(())
    }

    fn apply(&self, mut op: WriteOp) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::IllegalState(
                "cannot apply a write in a read-only session".to_string(),
            ));
        }
        if op.request().is_none() {
            return Err(StorageError::InvalidArgument(
                "write operation has no request".to_string(),
            ));
        }
        let size = op.size_in_buffer();
        self.buffer_bytes.increment(size as u64);

        let mut state = self.state.lock();
        let mode = state.flush_mode;
        match mode {
            FlushMode::AutoFlushSync => {
                drop(state);
                self.inner.execute_write(&mut op).inspect_err(|e| {
                    self.errors.record(op.to_string(), e.clone());
                })
            }
            FlushMode::ManualFlush => {
                if state.buffered + size > self.buffer_limit {
                    return Err(StorageError::Incomplete(format!(
                        "session buffer of {} bytes is full",
                        self.buffer_limit
                    )));
                }
                state.buffered += size;
                state.buffer.push(op);
                trace!(size, buffered = state.buffered, "Buffered write");
                Ok(())
            }
        }
    }

    fn flush_async(&self, done: FlushCallback) {
        let (mut ops, timeout) = {
            let mut state = self.state.lock();
            state.buffered = 0;
            (std::mem::take(&mut state.buffer), state.timeout)
        };
        let inner = Arc::clone(&self.inner);
        let errors = Arc::clone(&self.errors);

        self.runtime.spawn(async move {
            if tokio::time::timeout(timeout, tokio::time::sleep(inner.latency()))
                .await
                .is_err()
            {
                let status = StorageError::TimedOut(format!(
                    "flush of {} operations timed out after {:?}",
                    ops.len(),
                    timeout
                ));
                for op in &ops {
                    errors.record(op.to_string(), status.clone());
                }
                done(ops, Err(status));
                return;
            }
            let status = flush_ops(&inner, &errors, &mut ops);
            done(ops, status);
        });
    }

    fn read_async(&self, mut op: ReadOp, done: ReadCallback) {
        let timeout = self.state.lock().timeout;
        let inner = Arc::clone(&self.inner);

        self.runtime.spawn(async move {
            if tokio::time::timeout(timeout, tokio::time::sleep(inner.latency()))
                .await
                .is_err()
            {
                let status = StorageError::TimedOut(format!(
                    "{} timed out after {:?}",
                    op, timeout
                ));
                done(op, Err(status));
                return;
            }
            let status = inner.execute_read(&mut op);
            done(op, status);
        });
    }

    fn drain_pending_errors(&self) -> (Vec<OpError>, bool) {
        self.errors.drain()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Mutation, ReadRequest, RedisResponse, WriteRequest};
    use crate::metrics::MetricRegistry;
    use bytes::Bytes;
    use tokio::sync::oneshot;

    const MASTER: &str = "127.0.0.1:7100";

    fn options(masters: &[&str]) -> ClientOptions {
        ClientOptions {
            client_name: "test".to_string(),
            master_addresses: masters.iter().map(|s| s.to_string()).collect(),
            default_rpc_timeout: Duration::from_secs(5),
            session_buffer_bytes: 1024,
            metrics: Arc::new(MetricRegistry::new()),
        }
    }

    fn cluster() -> LocalCluster {
        let cluster = LocalCluster::new([MASTER]);
        cluster.create_table(".redis", 4).unwrap();
        cluster
    }

    fn write_op(table: &Arc<Table>, key: &str, value: &str) -> WriteOp {
        let mut op = table.new_redis_write();
        op.set_request(WriteRequest::new(
            Bytes::copy_from_slice(key.as_bytes()),
            Mutation::Set {
                value: Bytes::copy_from_slice(value.as_bytes()),
            },
        ))
        .unwrap();
        op
    }

    async fn flush(session: &Arc<dyn Session>) -> (Vec<WriteOp>, StorageResult<()>) {
        let (tx, rx) = oneshot::channel();
        session.flush_async(Box::new(move |ops, status| {
            let _ = tx.send((ops, status));
        }));
        rx.await.unwrap()
    }

    async fn read(session: &Arc<dyn Session>, op: ReadOp) -> (ReadOp, StorageResult<()>) {
        let (tx, rx) = oneshot::channel();
        session.read_async(
            op,
            Box::new(move |op, status| {
                let _ = tx.send((op, status));
            }),
        );
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_connect_requires_known_master() {
        let cluster = cluster();
        let connector = cluster.connector();
        assert!(matches!(
            connector.build(&options(&["10.0.0.1:7100"])),
            Err(StorageError::Unavailable(_))
        ));
        assert!(connector.build(&options(&["10.0.0.1:7100", MASTER])).is_ok());
        assert_eq!(cluster.stats().connects, 1);
    }

    #[test]
    fn test_connect_requires_runtime() {
        let cluster = cluster();
        assert!(matches!(
            cluster.connector().build(&options(&[MASTER])),
            Err(StorageError::IllegalState(_))
        ));
    }

    #[tokio::test]
    async fn test_open_missing_table() {
        let cluster = cluster();
        let client = cluster.connector().build(&options(&[MASTER])).unwrap();
        assert!(matches!(
            client.open_table("nope"),
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(client.open_table(".redis").unwrap().num_tablets(), 4);
    }

    #[tokio::test]
    async fn test_manual_flush_then_read() {
        let cluster = cluster();
        let client = cluster.connector().build(&options(&[MASTER])).unwrap();
        let table = client.open_table(".redis").unwrap();

        let session = client.new_session(false);
        session.set_flush_mode(FlushMode::ManualFlush).unwrap();
        session.apply(write_op(&table, "k", "v")).unwrap();
        assert_eq!(cluster.stats().writes, 0);

        let (ops, status) = flush(&session).await;
        assert!(status.is_ok());
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].response(), Some(&RedisResponse::ok()));

        let reader = client.new_session(true);
        let mut op = table.new_redis_read();
        op.set_request(ReadRequest::Get {
            key: Bytes::from_static(b"k"),
        })
        .unwrap();
        let (op, status) = read(&reader, op).await;
        assert!(status.is_ok());
        assert_eq!(op.into_response(), Some(RedisResponse::string("v")));
        assert_eq!(cluster.stats().sessions_opened, 2);
    }

    #[tokio::test]
    async fn test_auto_flush_applies_immediately() {
        let cluster = cluster();
        let client = cluster.connector().build(&options(&[MASTER])).unwrap();
        let table = client.open_table(".redis").unwrap();
        let session = client.new_session(false);
        session.apply(write_op(&table, "k", "v")).unwrap();
        assert_eq!(cluster.stats().writes, 1);
        assert_eq!(cluster.len(), 1);
    }

    #[tokio::test]
    async fn test_read_only_session_rejects_writes() {
        let cluster = cluster();
        let client = cluster.connector().build(&options(&[MASTER])).unwrap();
        let table = client.open_table(".redis").unwrap();
        let session = client.new_session(true);
        assert!(matches!(
            session.apply(write_op(&table, "k", "v")),
            Err(StorageError::IllegalState(_))
        ));
    }

    #[tokio::test]
    async fn test_flush_mode_change_with_buffered_ops() {
        let cluster = cluster();
        let client = cluster.connector().build(&options(&[MASTER])).unwrap();
        let table = client.open_table(".redis").unwrap();
        let session = client.new_session(false);
        session.set_flush_mode(FlushMode::ManualFlush).unwrap();
        session.apply(write_op(&table, "k", "v")).unwrap();
        assert!(matches!(
            session.set_flush_mode(FlushMode::AutoFlushSync),
            Err(StorageError::IllegalState(_))
        ));
    }

    #[tokio::test]
    async fn test_buffer_limit() {
        let cluster = cluster();
        let client = cluster.connector().build(&options(&[MASTER])).unwrap();
        let table = client.open_table(".redis").unwrap();
        let session = client.new_session(false);
        session.set_flush_mode(FlushMode::ManualFlush).unwrap();

        assert!(matches!(
            session.apply(write_op(&table, "k", &"x".repeat(2048))),
            Err(StorageError::Incomplete(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_flush_records_pending_errors() {
        let cluster = cluster();
        let client = cluster.connector().build(&options(&[MASTER])).unwrap();
        let table = client.open_table(".redis").unwrap();
        let session = client.new_session(false);
        session.set_flush_mode(FlushMode::ManualFlush).unwrap();
        session.apply(write_op(&table, "a", "1")).unwrap();
        session.apply(write_op(&table, "b", "2")).unwrap();

        cluster.set_fail_writes(true);
        let (_, status) = flush(&session).await;
        assert!(matches!(status, Err(StorageError::IoError(_))));

        let (errors, overflowed) = session.drain_pending_errors();
        assert_eq!(errors.len(), 2);
        assert!(!overflowed);
        assert_eq!(errors[0].operation, "REDIS_WRITE a");
        assert!(session.drain_pending_errors().0.is_empty());
    }

    #[tokio::test]
    async fn test_session_timeout() {
        let cluster = cluster();
        let client = cluster.connector().build(&options(&[MASTER])).unwrap();
        let table = client.open_table(".redis").unwrap();
        cluster.set_latency(Duration::from_millis(500));

        let session = client.new_session(true);
        session.set_timeout(Duration::from_millis(20));
        let mut op = table.new_redis_read();
        op.set_request(ReadRequest::Exists {
            key: Bytes::from_static(b"k"),
        })
        .unwrap();
        let (_, status) = read(&session, op).await;
        assert!(matches!(status, Err(StorageError::TimedOut(_))));
        assert_eq!(cluster.stats().reads, 0);
    }

    #[tokio::test]
    async fn test_unreachable_after_connect() {
        let cluster = cluster();
        let client = cluster.connector().build(&options(&[MASTER])).unwrap();
        let table = client.open_table(".redis").unwrap();
        cluster.set_unreachable(true);

        let mut op = table.new_redis_read();
        op.set_request(ReadRequest::Get {
            key: Bytes::from_static(b"k"),
        })
        .unwrap();
        let (_, status) = read(&client.new_session(true), op).await;
        assert!(matches!(status, Err(StorageError::Unavailable(_))));
    }

    #[test]
    fn test_error_collector_overflow() {
        let collector = ErrorCollector::new(2);
        for i in 0..3 {
            collector.record(format!("op{}", i), StorageError::TimedOut("t".into()));
        }
        let (errors, overflowed) = collector.drain();
        assert_eq!(errors.len(), 2);
        assert!(overflowed);
        assert_eq!(collector.drain(), (Vec::new(), false));
    }

    #[test]
    fn test_create_table_twice() {
        let cluster = cluster();
        assert!(matches!(
            cluster.create_table(".redis", 4),
            Err(StorageError::IllegalState(_))
        ));
        assert!(cluster.create_table("other", 0).is_err());
        assert!(cluster.drop_table(".redis"));
    }
}
