//! Inbound call plumbing
//!
//! The connection layer turns each decoded command into an [`InboundCall`]
//! and hands it to the command handler. The handler, or a completion it
//! registers with the storage client, answers the call exactly once.

pub mod call;
pub mod reply;

pub use call::{InboundCall, ReplySink};
pub use reply::Reply;
