//! Error types for the gateway.
//!
//! There are three layers of errors:
//!
//! - [`StorageError`]: reported by the storage client, its sessions and tables.
//! - [`ArgumentError`]: reported by the per-command parse functions. Its
//!   message goes back to the client verbatim.
//! - [`GatewayError`]: everything the router and pipelines can fail a call with.
//!
//! Every `GatewayError` that reaches a client is rendered as a single RESP
//! error reply prefixed with `ERR `.

use thiserror::Error;

/// Result type alias for storage client operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors reported by the storage client.
///
/// This type is `Clone` because the same failure is recorded as a session's
/// pending per-operation error and also handed to the completion as status.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out: {0}")]
    TimedOut(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Incomplete: {0}")]
    Incomplete(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A user-facing rejection from a command's parse function.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ArgumentError(pub String);

impl ArgumentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors that fail an inbound call.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("too few arguments: {0}")]
    TooFewArguments(String),

    #[error("wrong number of arguments: {0}")]
    WrongNumberOfArguments(String),

    /// Parser rejection, shown to the caller unchanged.
    #[error(transparent)]
    InvalidArgument(#[from] ArgumentError),

    #[error("could not open table {table}: {source}")]
    Bootstrap {
        table: String,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The command table does not match the expected layout. Startup only.
    #[error("command registry mismatch: {0}")]
    Registry(String),
}

impl GatewayError {
    /// The message written to the client, without the `ERR ` prefix.
    pub fn client_message(&self) -> String {
        self.to_string()
    }
}
