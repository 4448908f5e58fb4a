//! # resp-gateway - A Redis-Protocol Gateway over a Table-Backed Store
//!
//! resp-gateway accepts Redis (RESP) commands and serves them out of a single
//! table of a sharded, tablet-partitioned storage cluster. Every command is
//! translated into one row operation: reads are submitted straight to a
//! session, writes are buffered and flushed. Replies are produced by
//! completion callbacks that may run on any runtime worker thread.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              resp-gateway                                │
//! │                                                                          │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐              │
//! │  │ TCP Server  │───>│ Connection  │───>│  CommandHandler  │              │
//! │  │ (Listener)  │    │  Handler    │    │ registry, router │              │
//! │  └─────────────┘    └──────▲──────┘    └────────┬─────────┘              │
//! │                            │ replies            │ ensure_ready()         │
//! │                            │ in order           ▼                        │
//! │                     ┌──────┴──────┐    ┌──────────────────┐              │
//! │                     │ Completions │<───│  StorageHandle   │ lazy, once   │
//! │                     │ read, write │    │ client + table   │              │
//! │                     └─────────────┘    └────────┬─────────┘              │
//! │                                                 │ sessions               │
//! │                                                 ▼                        │
//! │                     ┌──────────────────────────────────────────────┐     │
//! │                     │          StorageClient (LocalCluster)        │     │
//! │                     │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │     │
//! │                     │  │Tablet 0│ │Tablet 1│ │Tablet 2│ │...N    │ │     │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │     │
//! │                     └──────────────────────────────────────────────┘     │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use resp_gateway::{CommandHandler, GatewayConfig, MetricRegistry};
//! use resp_gateway::connection::{handle_connection, ConnectionStats};
//! use resp_gateway::storage::LocalCluster;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig::default();
//!     let cluster = LocalCluster::new(config.master_addresses.iter().cloned());
//!     cluster.create_table(&config.table_name, config.tablets)?;
//!
//!     let handler = Arc::new(CommandHandler::new(
//!         &config,
//!         Arc::new(cluster.connector()),
//!         Arc::new(MetricRegistry::new()),
//!     )?);
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     let listener = TcpListener::bind(&config.listen_addr).await?;
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         tokio::spawn(handle_connection(stream, addr, Arc::clone(&handler), Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - Reads: `GET`, `HGET`, `STRLEN`, `EXISTS`, `GETRANGE`
//! - Writes: `SET key value [EX seconds | PX milliseconds]`, `HSET`, `GETSET`,
//!   `APPEND`, `DEL`, `SETRANGE`, `INCR`
//! - Local: `ECHO` (never touches storage), `QUIT` (connection level)
//!
//! Anything else is answered with `ERR unsupported command: <name>`.
//!
//! ## Module Overview
//!
//! - [`protocol`]: request frame decoding and RESP reply types
//! - [`rpc`]: the single-ownership inbound call and its reply
//! - [`commands`]: command registry, parse functions, pipelines, completions
//! - [`bootstrap`]: lazy, once-only construction of the storage client
//! - [`client`]: the storage client interface and row-operation encoding
//! - [`storage`]: in-process reference cluster implementing that interface
//! - [`connection`]: client connection management
//! - [`config`], [`metrics`], [`error`]: ambient plumbing

pub mod bootstrap;
pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod rpc;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::GatewayConfig;
pub use connection::{handle_connection, ConnectionStats};
pub use error::{GatewayError, StorageError};
pub use metrics::MetricRegistry;
pub use protocol::RespValue;
pub use rpc::{InboundCall, Reply};

/// The default port the gateway listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host the gateway binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of resp-gateway
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
