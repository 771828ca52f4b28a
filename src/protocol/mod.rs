//! RESP Protocol Subset
//!
//! Requests arrive as arrays of bulk strings:
//!
//! ```text
//! *<N>\r\n
//! $<len1>\r\n<arg1>\r\n
//! ...
//! $<lenN>\r\n<argN>\r\n
//! ```
//!
//! Replies are simple strings, errors, bulk strings or the null bulk string.
//! Inline commands, nested arrays and the other RESP types are not accepted.
//!
//! ## Modules
//!
//! - `types`: the `RespValue` reply enum and its serialization
//! - `parser`: incremental request parser that survives arbitrary chunking
//!
//! ## Example
//!
//! ```
//! use ttlkv::protocol::{RespParser, RespValue};
//! use bytes::Bytes;
//!
//! let mut parser = RespParser::new();
//! parser.extend(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
//! let command = parser.next_command().unwrap().unwrap();
//! assert_eq!(command.args(), &[Bytes::from("name")]);
//!
//! let response = RespValue::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(response.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_command, Command, Commands, ParseError, ParseResult, RespParser};
pub use types::RespValue;
