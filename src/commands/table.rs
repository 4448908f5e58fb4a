//! The command table and registry.
//!
//! Commands are fixed at build time. The registry is built once from
//! [`COMMAND_TABLE`], checked against the expected layout, and never changes
//! afterwards, so lookups need no locking.

use crate::commands::parse::{self, ReadParseFn, WriteParseFn};
use crate::error::GatewayError;
use crate::metrics::{MetricRegistry, MethodMetrics};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Read,
    Write,
    Echo,
}

/// What runs once a call passes validation.
#[derive(Clone, Copy)]
pub enum Handler {
    Read(ReadParseFn),
    Write(WriteParseFn),
    Echo,
}

impl Handler {
    pub fn kind(&self) -> CommandKind {
        match self {
            Handler::Read(_) => CommandKind::Read,
            Handler::Write(_) => CommandKind::Write,
            Handler::Echo => CommandKind::Echo,
        }
    }
}

/// Immutable description of one wire command.
///
/// A positive `arity` is the exact argument count, a negative one the
/// minimum. Both include the command name.
#[derive(Clone, Copy)]
pub struct CommandInfo {
    pub name: &'static str,
    pub arity: i32,
    pub handler: Handler,
}

impl CommandInfo {
    pub fn kind(&self) -> CommandKind {
        self.handler.kind()
    }
}

impl fmt::Debug for CommandInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandInfo")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("kind", &self.kind())
            .finish()
    }
}

#[rustfmt::skip]
pub const COMMAND_TABLE: &[CommandInfo] = &[
    CommandInfo { name: "get", arity: 2, handler: Handler::Read(parse::parse_get) },
    CommandInfo { name: "hget", arity: 3, handler: Handler::Read(parse::parse_hget) },
    CommandInfo { name: "strlen", arity: 2, handler: Handler::Read(parse::parse_strlen) },
    CommandInfo { name: "exists", arity: 2, handler: Handler::Read(parse::parse_exists) },
    CommandInfo { name: "getrange", arity: 4, handler: Handler::Read(parse::parse_getrange) },
    CommandInfo { name: "set", arity: -3, handler: Handler::Write(parse::parse_set) },
    CommandInfo { name: "hset", arity: 4, handler: Handler::Write(parse::parse_hset) },
    CommandInfo { name: "getset", arity: 3, handler: Handler::Write(parse::parse_getset) },
    CommandInfo { name: "append", arity: 3, handler: Handler::Write(parse::parse_append) },
    CommandInfo { name: "del", arity: 2, handler: Handler::Write(parse::parse_del) },
    CommandInfo { name: "setrange", arity: 4, handler: Handler::Write(parse::parse_setrange) },
    CommandInfo { name: "incr", arity: 2, handler: Handler::Write(parse::parse_incr) },
    CommandInfo { name: "echo", arity: 2, handler: Handler::Echo },
];

/// Names the table must list, in this order.
const EXPECTED_ORDER: &[&str] = &[
    "get", "hget", "strlen", "exists", "getrange", "set", "hset", "getset", "append", "del",
    "setrange", "incr", "echo",
];

/// A registered command and its latency metric.
#[derive(Debug, Clone)]
pub struct CommandEntry {
    pub info: CommandInfo,
    pub metrics: MethodMetrics,
}

#[derive(Debug)]
pub struct CommandRegistry {
    entries: Vec<CommandEntry>,
    by_name: HashMap<&'static str, usize>,
    longest_name: usize,
}

impl CommandRegistry {
    /// Builds the registry from the built-in command table.
    pub fn new(metrics: &MetricRegistry) -> Result<Self, GatewayError> {
        Self::from_table(COMMAND_TABLE, metrics)
    }

    pub fn from_table(
        table: &[CommandInfo],
        metrics: &MetricRegistry,
    ) -> Result<Self, GatewayError> {
        if table.len() != EXPECTED_ORDER.len() {
            return Err(GatewayError::Registry(format!(
                "expected {} commands, found {}",
                EXPECTED_ORDER.len(),
                table.len()
            )));
        }

        let mut entries = Vec::with_capacity(table.len());
        let mut by_name = HashMap::with_capacity(table.len());
        for (idx, (info, expected)) in table.iter().zip(EXPECTED_ORDER).enumerate() {
            if info.name != *expected {
                return Err(GatewayError::Registry(format!(
                    "command at index {} is {}, expected {}",
                    idx, info.name, expected
                )));
            }
            if info.arity == 0 {
                return Err(GatewayError::Registry(format!(
                    "command {} has arity 0",
                    info.name
                )));
            }
            by_name.insert(info.name, idx);
            entries.push(CommandEntry {
                info: *info,
                metrics: MethodMetrics::new(metrics, &format!("handler_latency_{}", info.name)),
            });
        }

        Ok(Self {
            longest_name: entries.iter().map(|e| e.info.name.len()).max().unwrap_or(0),
            entries,
            by_name,
        })
    }

    /// Case-insensitive lookup. `None` only means the name is not registered.
    pub fn fetch(&self, name: &[u8]) -> Option<&CommandEntry> {
        if name.len() > self.longest_name {
            return None;
        }
        let lower = name.to_ascii_lowercase();
        let name = std::str::from_utf8(&lower).ok()?;
        self.by_name.get(name).map(|idx| &self.entries[*idx])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandEntry> {
        self.entries.iter()
    }
}
