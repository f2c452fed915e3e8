//! Control commands and their dispatch onto the terminal table.

use std::fmt;

use crate::error::ProtocolErrorKind;
use crate::table::{MacAddr, TermTable};

use super::dump::render_dump;

/// A parsed administrative command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// `clear`: drop every terminal.
    Clear,
    /// `+MAC` / `-MAC`: set or clear the authorized flag.
    Mark { mac: MacAddr, authorized: bool },
    /// `dump`: render the table.
    Dump,
}

impl ControlCommand {
    /// Parse one line, without its trailing newline.
    ///
    /// Anything starting with `clear` flushes the table. Otherwise the first
    /// character is the operation and a hardware address follows it. Text
    /// after the address, separated by whitespace, is ignored.
    pub fn parse(line: &str) -> Result<Self, ProtocolErrorKind> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ProtocolErrorKind::Empty);
        }
        if line.starts_with("clear") {
            return Ok(ControlCommand::Clear);
        }
        if line.trim() == "dump" {
            return Ok(ControlCommand::Dump);
        }

        let mut chars = line.chars();
        let op = chars.next().ok_or(ProtocolErrorKind::Empty)?;
        let mac: MacAddr = chars
            .as_str()
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(|_| ProtocolErrorKind::InvalidMac {
                line: line.to_string(),
            })?;

        match op {
            '+' => Ok(ControlCommand::Mark {
                mac,
                authorized: true,
            }),
            '-' => Ok(ControlCommand::Mark {
                mac,
                authorized: false,
            }),
            _ => Err(ProtocolErrorKind::UnknownOperation {
                line: line.to_string(),
            }),
        }
    }

    /// Whether the command changes the table.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, ControlCommand::Dump)
    }

    /// Short name used in logs and audit records.
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::Clear => "clear",
            ControlCommand::Mark {
                authorized: true, ..
            } => "authorize",
            ControlCommand::Mark {
                authorized: false, ..
            } => "deny",
            ControlCommand::Dump => "dump",
        }
    }

    pub fn mac(&self) -> Option<MacAddr> {
        match self {
            ControlCommand::Mark { mac, .. } => Some(*mac),
            _ => None,
        }
    }

    /// Run the command against `table`.
    pub fn execute(&self, table: &TermTable) -> Outcome {
        match *self {
            ControlCommand::Clear => Outcome::Flushed(table.flush()),
            ControlCommand::Mark { mac, authorized } => match table.mark(&mac, authorized) {
                Ok(()) => Outcome::Marked,
                Err(_) => Outcome::UnknownTerminal,
            },
            ControlCommand::Dump => Outcome::Dumped(render_dump(table)),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Clear => f.write_str("clear"),
            ControlCommand::Mark {
                mac,
                authorized: true,
            } => write!(f, "+{}", mac),
            ControlCommand::Mark {
                mac,
                authorized: false,
            } => write!(f, "-{}", mac),
            ControlCommand::Dump => f.write_str("dump"),
        }
    }
}

/// Result of running a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Flushed(usize),
    Marked,
    /// Mark on an address the table does not hold. Not an error on the
    /// control channel.
    UnknownTerminal,
    Dumped(String),
}
