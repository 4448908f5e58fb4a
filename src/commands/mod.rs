//! Command Handling Module
//!
//! Turns inbound calls into storage operations and their results into replies.
//!
//! ## Flow
//!
//! ```text
//! InboundCall
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ CommandRegistry │  lookup + arity check (table)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ parse function  │  wire args -> request body (parse)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ read / write    │  session + async submit (handler)
//! │ pipeline        │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ completion      │  status -> exactly one reply (completion)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - Reads: `GET`, `HGET`, `STRLEN`, `EXISTS`, `GETRANGE`
//! - Writes: `SET [EX|PX]`, `HSET`, `GETSET`, `APPEND`, `DEL`, `SETRANGE`, `INCR`
//! - `ECHO`, answered without touching storage

pub mod completion;
pub mod handler;
pub mod parse;
pub mod table;

pub use handler::CommandHandler;
pub use table::{CommandEntry, CommandInfo, CommandKind, CommandRegistry, Handler, COMMAND_TABLE};
