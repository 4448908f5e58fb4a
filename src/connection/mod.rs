//! Connection Handler Module
//!
//! Each client connection runs on its own task. The task decodes request
//! frames, hands every command to the shared [`CommandHandler`] as an
//! [`InboundCall`](crate::rpc::InboundCall), and writes the replies back in
//! the order the commands arrived.
//!
//! ```text
//!  TcpStream ──read──> BytesMut ──frame::decode──> InboundCall ──> CommandHandler
//!      ▲                                               │
//!      │                                      oneshot reply channel
//!      │                                               ▼
//!      └──────────write (request order)────── VecDeque<Receiver<Reply>>
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use resp_gateway::connection::{handle_connection, ConnectionStats};
//! use std::sync::Arc;
//!
//! let stats = Arc::new(ConnectionStats::new());
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, Arc::clone(&handler), stats));
//! ```
//!
//! [`CommandHandler`]: crate::commands::CommandHandler

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
