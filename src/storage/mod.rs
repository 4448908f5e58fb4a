//! Reference storage cluster
//!
//! An in-process implementation of the storage-client interface in
//! [`crate::client`]. The gateway binary embeds one so it runs standalone, and
//! the tests use it to observe which calls reached storage.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────── LocalCluster ───────────────────────┐
//! │  table ".redis"                                              │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐        │
//! │  │ Tablet 0 │ │ Tablet 1 │ │ Tablet 2 │ │ Tablet N │        │
//! │  │ RwLock   │ │ RwLock   │ │ RwLock   │ │ RwLock   │        │
//! │  └──────────┘ └──────────┘ └──────────┘ └──────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//!          ▲                                  ▲
//!          │ sessions (tokio tasks)           │
//!   LocalConnector / LocalClient        ExpirySweeper
//! ```
//!
//! ## Example
//!
//! ```
//! use resp_gateway::storage::LocalCluster;
//!
//! let cluster = LocalCluster::new(["127.0.0.1:7100"]);
//! cluster.create_table(".redis", 4).unwrap();
//! assert!(cluster.is_empty());
//! ```

pub mod cluster;
pub mod expiry;
pub mod tablet;

pub use cluster::{ClusterStats, ErrorCollector, LocalCluster, LocalConnector, MAX_PENDING_ERRORS};
pub use expiry::{ExpiryConfig, ExpirySweeper};
pub use tablet::{Entry, Tablet, Value};
