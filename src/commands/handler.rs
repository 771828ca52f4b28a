//! Command Handler
//!
//! Validates one parsed command and executes it against the storage engine.
//!
//! ## Supported Commands
//!
//! - `PING` - Test connection
//! - `ECHO message` - Echo message
//! - `SET key value [PX milliseconds]` - Set a key, optionally with a TTL
//! - `GET key` - Get a key's value
//!
//! Every failure is a [`CommandError`], rendered as a `-ERR ...` reply. The
//! connection stays usable after any of them.

use crate::protocol::{Command, RespValue};
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why a command was rejected. The `Display` text is the wire error message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// `*0` frame
    #[error("ERR empty command")]
    EmptyCommand,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    /// TTL argument is not a non-negative integer
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    /// Unrecognised option token
    #[error("ERR syntax error")]
    Syntax,

    /// A simple-string reply cannot carry CR or LF
    #[error("ERR {0} message must not contain CR or LF")]
    LineBreak(&'static str),
}

/// Result type for command execution.
pub type CommandResult = Result<RespValue, CommandError>;

/// Executes commands against a shared [`StorageEngine`].
///
/// Cheap to clone; every connection gets its own copy.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
}

impl CommandHandler {
    /// Creates a new command handler with the given storage engine.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// Executes a command and returns the reply.
    ///
    /// The flag is `true` when the command was recognised and well-formed.
    /// It has no effect on the wire; callers use it for diagnostics.
    pub fn execute(&self, command: Command) -> (RespValue, bool) {
        match self.try_execute(command) {
            Ok(reply) => (reply, true),
            Err(e) => (RespValue::error(e.to_string()), false),
        }
    }

    /// Executes a command, keeping the error typed.
    pub fn try_execute(&self, command: Command) -> CommandResult {
        let name = match command.name() {
            Some(name) => String::from_utf8_lossy(name).to_ascii_uppercase(),
            None => return Err(CommandError::EmptyCommand),
        };

        self.dispatch(&name, command.args())
    }

    fn dispatch(&self, cmd: &str, args: &[Bytes]) -> CommandResult {
        match cmd {
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            _ => Err(CommandError::UnknownCommand(cmd.to_string())),
        }
    }

    /// PING
    fn cmd_ping(&self, args: &[Bytes]) -> CommandResult {
        if !args.is_empty() {
            return Err(CommandError::WrongArity("PING"));
        }
        Ok(RespValue::pong())
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[Bytes]) -> CommandResult {
        match args {
            [message] if message.iter().any(|&b| b == b'\r' || b == b'\n') => {
                Err(CommandError::LineBreak("ECHO"))
            }
            [message] => Ok(RespValue::simple_string(String::from_utf8_lossy(message))),
            _ => Err(CommandError::WrongArity("ECHO")),
        }
    }

    /// SET key value [PX milliseconds]
    fn cmd_set(&self, args: &[Bytes]) -> CommandResult {
        match args {
            [key, value] => {
                self.storage.set(key.clone(), value.clone());
                Ok(RespValue::ok())
            }
            [key, value, option, millis] => {
                if !option.eq_ignore_ascii_case(b"PX") {
                    return Err(CommandError::Syntax);
                }
                let ttl = parse_millis(millis)?;
                self.storage.set_with_ttl(key.clone(), value.clone(), ttl);
                Ok(RespValue::ok())
            }
            _ => Err(CommandError::WrongArity("SET")),
        }
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> CommandResult {
        let [key] = args else {
            return Err(CommandError::WrongArity("GET"));
        };

        Ok(match self.storage.get(key) {
            Some(value) => RespValue::bulk_string(value),
            None => RespValue::null(),
        })
    }
}

/// Parses a non-negative millisecond count.
fn parse_millis(raw: &[u8]) -> Result<Duration, CommandError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .ok_or(CommandError::NotAnInteger)
}
