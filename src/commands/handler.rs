//! Command Router and Execution Pipelines
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         CommandHandler                           │
//! │                                                                  │
//! │  ┌──────────┐    ┌────────────────────┐    ┌──────────────────┐  │
//! │  │ fetch()  │───>│validate_and_dispatch│──>│ echo             │  │
//! │  └──────────┘    └────────────────────┘ ├─>│ execute_read     │──┼──> read_async
//! │                                         └─>│ execute_write    │──┼──> apply + flush_async
//! │                                            └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//!                                                        │
//!                              ReadCompletion / WriteCompletion ──> reply
//! ```
//!
//! Every call gets exactly one reply. Validation and parse failures reply on
//! the dispatching thread; storage results reply from the completion, on the
//! storage client's thread.

use crate::bootstrap::StorageHandle;
use crate::client::{ClientFactory, FlushMode, RedisResponse, Session};
use crate::commands::completion::{ReadCompletion, WriteCompletion};
use crate::commands::parse::{ReadParseFn, WriteParseFn};
use crate::commands::table::{CommandEntry, CommandInfo, CommandRegistry, Handler};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, StorageResult};
use crate::metrics::{Histogram, MetricRegistry, MethodMetrics};
use crate::rpc::InboundCall;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Routes inbound calls to their command's pipeline.
///
/// Shared by every connection; all state is read-only after construction
/// apart from the one-time storage bootstrap.
pub struct CommandHandler {
    registry: CommandRegistry,
    storage: StorageHandle,
    session_timeout: Duration,
    metrics: Arc<MetricRegistry>,
    error_metrics: MethodMetrics,
    read_internal: Arc<Histogram>,
    write_internal: Arc<Histogram>,
}

impl CommandHandler {
    /// Creates a handler. Fails only if the command table is malformed.
    pub fn new(
        config: &GatewayConfig,
        factory: Arc<dyn ClientFactory>,
        metrics: Arc<MetricRegistry>,
    ) -> Result<Self, GatewayError> {
        let registry = CommandRegistry::new(&metrics)?;
        let storage = StorageHandle::from_config(config, factory, Arc::clone(&metrics));
        Ok(Self {
            registry,
            storage,
            session_timeout: config.session_timeout,
            error_metrics: MethodMetrics::new(&metrics, "handler_latency_error"),
            read_internal: metrics.histogram("read_internal"),
            write_internal: metrics.histogram("write_internal"),
            metrics,
        })
    }

    pub fn metrics(&self) -> &Arc<MetricRegistry> {
        &self.metrics
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &StorageHandle {
        &self.storage
    }

    /// Handles one call. Returns once the call is answered or submitted.
    pub fn handle(&self, call: InboundCall) {
        trace!(call = call.id(), "Handling {:?}", call);
        let entry = self.fetch(call.command_name());
        self.validate_and_dispatch(entry, call);
    }

    pub fn fetch(&self, name: &[u8]) -> Option<&CommandEntry> {
        self.registry.fetch(name)
    }

    pub fn validate_and_dispatch(&self, entry: Option<&CommandEntry>, call: InboundCall) {
        let Some(entry) = entry else {
            let name = String::from_utf8_lossy(call.command_name()).into_owned();
            info!(call = call.id(), command = %name, "Unsupported command");
            return self.fail(call, GatewayError::UnsupportedCommand(name));
        };

        if let Err(e) = check_arity(&entry.info, call.args().len()) {
            warn!(
                call = call.id(),
                command = entry.info.name,
                args = call.args().len(),
                "{}",
                e
            );
            return self.fail(call, e);
        }

        match entry.info.handler {
            Handler::Echo => self.echo(call, entry),
            Handler::Read(parse) => self.execute_read(call, entry, parse),
            Handler::Write(parse) => self.execute_write(call, entry, parse),
        }
    }

    fn echo(&self, call: InboundCall, entry: &CommandEntry) {
        let message = call.args().get(1).cloned().unwrap_or_default();
        call.respond_success(RedisResponse::string(message), &entry.metrics);
    }

    /// Submits a read; the reply comes from a [`ReadCompletion`].
    pub fn execute_read(&self, call: InboundCall, entry: &CommandEntry, parse: ReadParseFn) {
        // Blocks this worker while a first client is being built.
        let ready = match self.storage.ensure_ready() {
            Ok(ready) => ready,
            Err(e) => return self.fail(call, e),
        };

        let session = ready.client.new_session(true);
        if let Err(e) = self.configure_session(&session) {
            return self.fail(call, e.into());
        }

        let mut op = ready.table.new_redis_read();
        if let Err(e) = parse(&mut op, call.args()) {
            debug!(call = call.id(), command = entry.info.name, error = %e, "Rejected arguments");
            return self.fail(call, e);
        }

        trace!(call = call.id(), operation = %op, "Submitting read");
        let completion = ReadCompletion::new(
            call,
            Arc::clone(&session),
            entry.metrics.clone(),
            Arc::clone(&self.read_internal),
        );
        session.read_async(op, Box::new(move |op, status| completion.run(op, status)));
    }

    /// Buffers a write and flushes it; the reply comes from a [`WriteCompletion`].
    pub fn execute_write(&self, call: InboundCall, entry: &CommandEntry, parse: WriteParseFn) {
        // Blocks this worker while a first client is being built.
        let ready = match self.storage.ensure_ready() {
            Ok(ready) => ready,
            Err(e) => return self.fail(call, e),
        };

        let session = ready.client.new_session(false);
        if let Err(e) = self.configure_session(&session) {
            return self.fail(call, e.into());
        }

        let mut op = ready.table.new_redis_write();
        if let Err(e) = parse(&mut op, call.args()) {
            debug!(call = call.id(), command = entry.info.name, error = %e, "Rejected arguments");
            return self.fail(call, e);
        }

        trace!(call = call.id(), operation = %op, "Buffering write");
        if let Err(e) = session.apply(op) {
            // A locally well-formed operation should always buffer.
            error!(
                call = call.id(),
                command = entry.info.name,
                error = %e,
                "Failed to apply write"
            );
            return self.fail(call, e.into());
        }

        let completion = WriteCompletion::new(
            call,
            Arc::clone(&session),
            entry.metrics.clone(),
            Arc::clone(&self.write_internal),
        );
        session.flush_async(Box::new(move |ops, status| completion.run(ops, status)));
    }

    fn configure_session(&self, session: &Arc<dyn Session>) -> StorageResult<()> {
        session.set_timeout(self.session_timeout);
        session.set_flush_mode(FlushMode::ManualFlush)
    }

    fn fail(&self, call: InboundCall, error: GatewayError) {
        call.respond_failure(error.client_message(), &self.error_metrics);
    }
}

fn check_arity(info: &CommandInfo, argc: usize) -> Result<(), GatewayError> {
    let argc = argc as i64;
    let arity = i64::from(info.arity);
    if arity < 0 && argc < -arity {
        return Err(GatewayError::TooFewArguments(info.name.to_string()));
    }
    if arity > 0 && argc != arity {
        return Err(GatewayError::WrongNumberOfArguments(info.name.to_string()));
    }
    Ok(())
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("commands", &self.registry.len())
            .field("storage", &self.storage)
            .field("session_timeout", &self.session_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ResponseCode;
    use crate::protocol::RespValue;
    use crate::rpc::call::test_support::RecordingSink;
    use crate::rpc::Reply;
    use crate::storage::LocalCluster;
    use bytes::Bytes;

    const MASTER: &str = "127.0.0.1:7100";

    fn setup() -> (CommandHandler, LocalCluster) {
        setup_with(GatewayConfig::default())
    }

    fn setup_with(config: GatewayConfig) -> (CommandHandler, LocalCluster) {
        let cluster = LocalCluster::new([MASTER]);
        cluster.create_table(&config.table_name, 4).unwrap();
        let handler = CommandHandler::new(
            &config,
            Arc::new(cluster.connector()),
            Arc::new(MetricRegistry::new()),
        )
        .unwrap();
        (handler, cluster)
    }

    fn make_call(args: &[&str]) -> (InboundCall, tokio::sync::oneshot::Receiver<Reply>) {
        InboundCall::with_channel(
            args.iter()
                .map(|s| Bytes::copy_from_slice(s.as_bytes()))
                .collect(),
        )
    }

    async fn execute(handler: &CommandHandler, args: &[&str]) -> RespValue {
        let (call, rx) = make_call(args);
        handler.handle(call);
        rx.await.unwrap().to_resp()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_set_get() {
        let (handler, _cluster) = setup();

        assert_eq!(execute(&handler, &["SET", "k", "v"]).await, RespValue::ok());
        assert_eq!(
            execute(&handler, &["GET", "k"]).await,
            RespValue::bulk_string(Bytes::from("v"))
        );
        assert_eq!(execute(&handler, &["GET", "absent"]).await, RespValue::null());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_echo_skips_storage() {
        let (handler, cluster) = setup();

        assert_eq!(
            execute(&handler, &["ECHO", "hello"]).await,
            RespValue::bulk_string(Bytes::from("hello"))
        );
        assert_eq!(cluster.stats().connects, 0);
        assert_eq!(cluster.stats().sessions_opened, 0);
        assert!(!handler.storage().is_ready());
    }

    #[tokio::test]
    async fn test_unsupported_command() {
        let (handler, cluster) = setup();
        assert_eq!(
            execute(&handler, &["FLUSHALL"]).await,
            RespValue::error("ERR unsupported command: FLUSHALL")
        );
        assert_eq!(cluster.stats().connects, 0);
        assert_eq!(
            handler
                .metrics()
                .get("handler_latency_error")
                .unwrap()
                .count(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_exact_arity_for_every_command() {
        let (handler, cluster) = setup();

        let exact: Vec<_> = handler
            .registry()
            .iter()
            .filter(|e| e.info.arity > 0)
            .map(|e| (e.info.name, e.info.arity as usize))
            .collect();

        for (name, arity) in exact {
            let wrong = format!("ERR wrong number of arguments: {}", name);
            for argc in [arity - 1, arity + 1] {
                let mut args = vec![name];
                args.resize(argc, "1");
                let sessions = cluster.stats().sessions_opened;
                assert_eq!(execute(&handler, &args).await, RespValue::error(wrong.clone()));
                assert_eq!(cluster.stats().sessions_opened, sessions);
            }

            let mut args = vec![name];
            args.resize(arity, "1");
            let reply = execute(&handler, &args).await;
            assert_ne!(reply, RespValue::error(wrong), "{} with {} args", name, arity);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_minimum_arity() {
        let (handler, cluster) = setup();

        assert_eq!(
            execute(&handler, &["set", "k"]).await,
            RespValue::error("ERR too few arguments: set")
        );
        assert_eq!(cluster.stats().sessions_opened, 0);
        assert_eq!(execute(&handler, &["set", "k", "v"]).await, RespValue::ok());
        assert_eq!(
            execute(&handler, &["set", "k", "v", "EX", "100"]).await,
            RespValue::ok()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_case_insensitive_names() {
        let (handler, _cluster) = setup();
        execute(&handler, &["set", "k", "v"]).await;
        for name in ["GET", "get", "GeT"] {
            assert_eq!(
                execute(&handler, &[name, "k"]).await,
                RespValue::bulk_string(Bytes::from("v"))
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exactly_one_reply_per_call() {
        let (handler, cluster) = setup();
        let sink = RecordingSink::default();
        cluster.set_latency(Duration::from_millis(5));

        let scripts: &[&[&str]] = &[
            &["set", "a", "1"],
            &["get", "a"],
            &["incr", "a"],
            &["echo", "hi"],
            &["nope"],
            &["get"],
            &["set", "a"],
            &["set", "a", "1", "EX", "0"],
            &["getrange", "a", "x", "1"],
            &["hget", "a", "f"],
            &["del", "a"],
            &["exists", "a"],
        ];
        let mut ids = Vec::new();
        for _ in 0..5 {
            for script in scripts {
                let (call, id) = sink.call(script);
                ids.push(id);
                handler.handle(call);
            }
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while sink.total() < ids.len() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sink.total(), ids.len());
        for id in ids {
            assert_eq!(sink.replies_for(id).len(), 1, "call {}", id);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_connects_once() {
        let (handler, cluster) = setup();
        let handler = Arc::new(handler);

        let mut tasks = Vec::new();
        for i in 0..32 {
            let handler = Arc::clone(&handler);
            tasks.push(tokio::spawn(async move {
                let key = format!("k{}", i);
                execute(&handler, &["exists", key.as_str()]).await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), RespValue::integer(0));
        }

        assert_eq!(cluster.stats().connects, 1);
        assert_eq!(cluster.stats().tables_opened, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bootstrap_failure_is_retried() {
        let (handler, cluster) = setup();
        cluster.set_unreachable(true);

        let reply = execute(&handler, &["get", "k"]).await;
        assert_eq!(
            reply,
            RespValue::error(
                "ERR could not open table .redis: Service unavailable: cluster is unreachable"
            )
        );
        assert!(!handler.storage().is_ready());

        cluster.set_unreachable(false);
        assert_eq!(execute(&handler, &["get", "k"]).await, RespValue::null());
        assert_eq!(cluster.stats().connects, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_master_fails_bootstrap() {
        let config = GatewayConfig::builder()
            .master_addresses(["10.1.1.1:7100"])
            .build();
        let (handler, cluster) = setup_with(config);

        let reply = execute(&handler, &["set", "k", "v"]).await;
        assert!(
            matches!(reply, RespValue::Error(ref m) if m.starts_with("ERR could not open table"))
        );
        assert_eq!(cluster.stats().connects, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parse_failure_never_reaches_storage() {
        let (handler, cluster) = setup();

        assert_eq!(
            execute(&handler, &["set", "k", "v", "EX", "0"]).await,
            RespValue::error("ERR invalid expire time in 'set' command")
        );
        assert_eq!(
            execute(&handler, &["setrange", "k", "-1", "v"]).await,
            RespValue::error("ERR offset is out of range")
        );
        assert_eq!(cluster.stats().writes, 0);
        assert_eq!(
            handler.metrics().get("write_buffer_bytes").unwrap().count(),
            0
        );
        assert_eq!(
            handler.metrics().get("write_internal").unwrap().count(),
            0
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_huge_expiry_is_rejected() {
        let (handler, cluster) = setup();

        for unit in ["EX", "PX"] {
            assert_eq!(
                execute(&handler, &["set", "k", "v", unit, "9223372036854775807"]).await,
                RespValue::error("ERR invalid expire time in 'set' command")
            );
        }
        assert_eq!(cluster.stats().writes, 0);
        assert_eq!(
            execute(&handler, &["set", "k", "v", "EX", "3600"]).await,
            RespValue::ok()
        );
        assert_eq!(
            execute(&handler, &["get", "k"]).await,
            RespValue::bulk_string(Bytes::from("v"))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_type_errors_come_from_storage() {
        let (handler, _cluster) = setup();

        assert_eq!(
            execute(&handler, &["hset", "h", "f", "v"]).await,
            RespValue::integer(1)
        );
        assert_eq!(
            execute(&handler, &["get", "h"]).await,
            RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value")
        );

        execute(&handler, &["set", "s", "abc"]).await;
        assert_eq!(
            execute(&handler, &["incr", "s"]).await,
            RespValue::error("ERR value is not an integer or out of range")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_string_commands() {
        let (handler, _cluster) = setup();

        assert_eq!(execute(&handler, &["incr", "n"]).await, RespValue::integer(1));
        assert_eq!(execute(&handler, &["incr", "n"]).await, RespValue::integer(2));
        assert_eq!(
            execute(&handler, &["append", "n", "0"]).await,
            RespValue::integer(2)
        );
        assert_eq!(
            execute(&handler, &["getset", "n", "x"]).await,
            RespValue::bulk_string(Bytes::from("20"))
        );
        assert_eq!(
            execute(&handler, &["setrange", "n", "2", "yz"]).await,
            RespValue::integer(4)
        );
        assert_eq!(
            execute(&handler, &["getrange", "n", "1", "-1"]).await,
            RespValue::bulk_string(Bytes::from_static(b"\0yz"))
        );
        assert_eq!(execute(&handler, &["strlen", "n"]).await, RespValue::integer(4));
        assert_eq!(execute(&handler, &["del", "n"]).await, RespValue::integer(1));
        assert_eq!(execute(&handler, &["exists", "n"]).await, RespValue::integer(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_storage_failure_is_reported() {
        let (handler, cluster) = setup();
        execute(&handler, &["get", "warmup"]).await;

        cluster.set_fail_writes(true);
        assert_eq!(
            execute(&handler, &["set", "k", "v"]).await,
            RespValue::error("ERR IO error: 1 of 1 operations failed")
        );
        assert_eq!(
            handler.metrics().get("write_internal").unwrap().count(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_session_timeout_fails_call() {
        let config = GatewayConfig::builder().session_timeout_ms(20).build();
        let (handler, cluster) = setup_with(config);
        cluster.set_latency(Duration::from_millis(300));

        let reply = execute(&handler, &["get", "k"]).await;
        assert!(matches!(reply, RespValue::Error(ref m) if m.starts_with("ERR Timed out")));
        assert_eq!(cluster.stats().reads, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_latency_metrics() {
        let (handler, _cluster) = setup();
        execute(&handler, &["set", "k", "v"]).await;
        execute(&handler, &["get", "k"]).await;
        execute(&handler, &["getrange", "k", "0", "0"]).await;

        let metrics = handler.metrics();
        assert_eq!(metrics.get("handler_latency_set").unwrap().count(), 1);
        assert_eq!(metrics.get("handler_latency_get").unwrap().count(), 1);
        assert_eq!(metrics.get("handler_latency_getrange").unwrap().count(), 1);
        assert_eq!(metrics.get("handler_latency_exists").unwrap().count(), 0);
        assert_eq!(metrics.get("read_internal").unwrap().count(), 2);
        assert_eq!(metrics.get("write_internal").unwrap().count(), 1);
        assert_eq!(metrics.get("write_buffer_bytes").unwrap().count(), 1);
    }

    #[test]
    fn test_check_arity() {
        let registry = CommandRegistry::new(&MetricRegistry::new()).unwrap();
        let get = &registry.fetch(b"get").unwrap().info;
        assert!(check_arity(get, 2).is_ok());
        assert!(matches!(
            check_arity(get, 3),
            Err(GatewayError::WrongNumberOfArguments(_))
        ));
        let set = &registry.fetch(b"set").unwrap().info;
        assert!(check_arity(set, 7).is_ok());
        assert!(matches!(
            check_arity(set, 2),
            Err(GatewayError::TooFewArguments(_))
        ));
    }

    #[test]
    fn test_response_code_rendering_defaults() {
        assert_eq!(
            Reply::Success(RedisResponse::with_code(ResponseCode::OutOfRange)).to_resp(),
            RespValue::error("ERR offset is out of range")
        );
    }
}
