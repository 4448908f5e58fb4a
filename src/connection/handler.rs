//! Connection Handler Implementation
//!
//! Each accepted client gets one `ConnectionHandler`, run on its own task.
//! Complete commands are turned into inbound calls as soon as they are
//! decoded; their replies arrive on oneshot channels, possibly out of order
//! and from other threads, and are written back in request order.

use crate::commands::CommandHandler;
use crate::protocol::{frame, FrameError, RespValue};
use crate::rpc::{InboundCall, Reply};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

/// Upper bound on buffered, not yet decoded request bytes.
const MAX_BUFFER_SIZE: usize = frame::MAX_BULK_SIZE + frame::MAX_INLINE_SIZE;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics shared by all connections of a server.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently open connections
    pub active_connections: AtomicU64,
    /// Commands dispatched as inbound calls
    pub commands_processed: AtomicU64,
    /// Replies that were RESP errors
    pub error_replies: AtomicU64,
    /// Bytes read from clients
    pub bytes_read: AtomicU64,
    /// Bytes written to clients
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error_reply(&self) {
        self.error_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, n: usize) {
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, n: usize) {
        self.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Drives one client connection.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    /// Reply channels of dispatched calls, oldest first
    pending: VecDeque<oneshot::Receiver<Reply>>,
    command_handler: Arc<CommandHandler>,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: Arc<CommandHandler>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            pending: VecDeque::new(),
            command_handler,
            stats,
        }
    }

    /// Runs the connection until the client disconnects, sends QUIT, or an
    /// error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Dispatch everything already buffered before waiting on replies,
            // so pipelined commands run concurrently.
            loop {
                let args = match frame::decode(&mut self.buffer) {
                    Ok(Some(args)) => args,
                    Ok(None) => break,
                    Err(e) => return self.protocol_error(e).await,
                };
                trace!(
                    client = %self.addr,
                    remaining = self.buffer.len(),
                    "Decoded command"
                );

                if is_quit(&args) {
                    self.write_pending().await?;
                    self.send(&RespValue::ok()).await?;
                    self.stream.flush().await?;
                    return Ok(());
                }
                self.dispatch(args);
            }

            self.write_pending().await?;
            self.stream.flush().await?;
            self.read_more_data().await?;
        }
    }

    fn dispatch(&mut self, args: Vec<Bytes>) {
        let (call, rx) = InboundCall::with_channel(args);
        debug!(
            client = %self.addr,
            call = call.id(),
            command = %String::from_utf8_lossy(call.command_name()),
            "Dispatching call"
        );
        self.command_handler.handle(call);
        self.stats.command_processed();
        self.pending.push_back(rx);
    }

    /// Writes the replies of all dispatched calls, in dispatch order.
    async fn write_pending(&mut self) -> Result<(), ConnectionError> {
        while let Some(rx) = self.pending.pop_front() {
            let reply = match rx.await {
                Ok(reply) => reply.to_resp(),
                Err(_) => RespValue::error("ERR call dropped before completion"),
            };
            self.send(&reply).await?;
        }
        Ok(())
    }

    /// Answers what is already dispatched, reports the framing error, and
    /// closes: the rest of the stream cannot be resynchronized.
    async fn protocol_error(&mut self, e: FrameError) -> Result<(), ConnectionError> {
        warn!(client = %self.addr, error = %e, "Protocol error");
        self.write_pending().await?;
        self.send(&RespValue::error(format!("ERR Protocol error: {}", e)))
            .await?;
        self.stream.flush().await?;
        Err(ConnectionError::Protocol(e))
    }

    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Buffers one reply; the caller flushes.
    async fn send(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        if response.is_error() {
            self.stats.error_reply();
        }
        let mut out = BytesMut::new();
        response.encode(&mut out);
        self.stream.write_all(&out).await?;
        self.stats.bytes_written(out.len());
        trace!(client = %self.addr, bytes = out.len(), "Queued reply");
        Ok(())
    }
}

fn is_quit(args: &[Bytes]) -> bool {
    args.first()
        .is_some_and(|name| name.eq_ignore_ascii_case(b"quit"))
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] FrameError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial command)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Handles a client connection to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: Arc<CommandHandler>,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}
