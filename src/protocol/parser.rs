//! Incremental RESP Request Parser
//!
//! TCP delivers a byte stream, not messages. A single read may end in the
//! middle of a frame, or carry several frames at once when a client pipelines.
//! The parser therefore owns the connection's accumulation buffer and walks
//! an explicit state machine over it:
//!
//! ```text
//!            *<N>\r\n                 $<len>\r\n
//! ┌────────┐ ───────> ┌────────────┐ ─────────> ┌─────────┐
//! │ Header │          │ BulkLength │            │ Payload │
//! └────────┘ <─────── └────────────┘ <───────── └─────────┘
//!     ▲   last argument                more arguments   │
//!     └─────────────────────────────────────────────────┘
//! ```
//!
//! Completed pieces are consumed from the buffer as soon as they are
//! recognised, so a partially received frame is never re-scanned and consumed
//! bytes are never replayed.
//!
//! [`RespParser::next_command`] returns:
//! - `Ok(Some(command))` - a complete frame was extracted
//! - `Ok(None)` - the buffer holds no complete frame yet; read more bytes
//! - `Err(ParseError)` - the current frame is malformed; input up to the next
//!   line starting with `*` is skipped, and frames after it parse normally
//!
//! "Need more bytes" and "malformed" are never conflated.

use crate::protocol::types::{prefix, CRLF};
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur while parsing a request frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A header line started with the wrong type byte
    #[error("expected '{}', got '{}'", *expected as char, (*found as char).escape_default())]
    UnexpectedPrefix { expected: u8, found: u8 },

    /// A header line was just CRLF
    #[error("empty header line")]
    EmptyHeader,

    /// The `*<N>` count is not a non-negative decimal
    #[error("invalid multibulk length '{0}'")]
    InvalidCount(String),

    /// The `$<len>` length is not a non-negative decimal
    #[error("invalid bulk length '{0}'")]
    InvalidLength(String),

    /// A payload was not followed by CRLF
    #[error("expected CRLF after bulk payload")]
    MissingCrlf,

    /// A header line did not terminate within the allowed length
    #[error("header line exceeds {max} bytes")]
    HeaderTooLong { max: usize },

    /// The frame declares more arguments than allowed
    #[error("too many arguments: {count} (max: {max})")]
    TooManyArguments { count: usize, max: usize },

    /// A single argument exceeds the maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of arguments in one frame
pub const MAX_ARGS: usize = 1024 * 1024;

/// Maximum length of a `*<N>` or `$<len>` line, excluding CRLF
pub const MAX_HEADER_LEN: usize = 32;

/// Upper bound on argument vector preallocation, whatever `*<N>` claims
const PREALLOC_LIMIT: usize = 64;

/// One parsed request: the command name followed by its arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    parts: Vec<Bytes>,
}

impl Command {
    pub fn new(parts: Vec<Bytes>) -> Self {
        Self { parts }
    }

    /// The command name as sent (not case-normalised).
    pub fn name(&self) -> Option<&Bytes> {
        self.parts.first()
    }

    /// Everything after the command name.
    pub fn args(&self) -> &[Bytes] {
        self.parts.get(1..).unwrap_or_default()
    }

    /// Number of elements, including the name.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn into_parts(self) -> Vec<Bytes> {
        self.parts
    }
}

impl FromIterator<Bytes> for Command {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for `*<N>\r\n`
    Header,
    /// Waiting for `$<len>\r\n`; `remaining` counts this argument too
    BulkLength { remaining: usize },
    /// Waiting for `<len>` bytes plus CRLF
    Payload { len: usize, remaining: usize },
    /// Skipping the rest of a malformed frame until a line starts with `*`
    Discard { at_line_start: bool },
}

/// Per-connection frame parser.
///
/// # Example
///
/// ```
/// use ttlkv::protocol::RespParser;
///
/// let mut parser = RespParser::new();
/// parser.extend(b"*1\r\n$4\r\nPI");
/// assert!(parser.next_command().unwrap().is_none());
///
/// parser.extend(b"NG\r\n");
/// let command = parser.next_command().unwrap().unwrap();
/// assert_eq!(command.name().unwrap().as_ref(), b"PING");
/// ```
#[derive(Debug)]
pub struct RespParser {
    /// Bytes received but not yet consumed
    buffer: BytesMut,
    state: State,
    /// Arguments of the frame currently being assembled
    args: Vec<Bytes>,
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RespParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self::with_capacity(4096)
    }

    /// Creates a parser whose buffer starts with `capacity` bytes reserved.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            state: State::Header,
            args: Vec::new(),
        }
    }

    /// Appends newly received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Direct access to the accumulation buffer, for reading straight from a socket.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Number of received bytes not yet consumed by a state transition.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// True when no part of any frame is pending.
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty() && matches!(self.state, State::Header | State::Discard { .. })
    }

    /// Extracts the next complete command, if one is buffered.
    ///
    /// After an error the parser skips ahead to the next line that starts
    /// with `*`, so each malformed frame is reported once and the frames
    /// behind it are still parsed.
    pub fn next_command(&mut self) -> ParseResult<Option<Command>> {
        let result = self.step();
        if let Err(error) = &result {
            self.args.clear();
            // Only these fail before the offending line has been consumed
            let at_line_start =
                !matches!(error, ParseError::HeaderTooLong { .. } | ParseError::MissingCrlf);
            self.state = State::Discard { at_line_start };
        }
        result
    }

    /// Lazily yields every complete command currently buffered, in arrival order.
    ///
    /// The iterator ends when the buffer runs out of complete frames. Parse
    /// errors are yielded in place of the frames that caused them.
    pub fn commands(&mut self) -> Commands<'_> {
        Commands { parser: self }
    }

    fn step(&mut self) -> ParseResult<Option<Command>> {
        loop {
            match self.state {
                State::Header => {
                    let Some(line) = self.take_line()? else {
                        return Ok(None);
                    };
                    let count = parse_count(&line)?;
                    if count > MAX_ARGS {
                        return Err(ParseError::TooManyArguments {
                            count,
                            max: MAX_ARGS,
                        });
                    }
                    if count == 0 {
                        return Ok(Some(Command::default()));
                    }
                    self.args = Vec::with_capacity(count.min(PREALLOC_LIMIT));
                    self.state = State::BulkLength { remaining: count };
                }
                State::BulkLength { remaining } => {
                    let Some(line) = self.take_line()? else {
                        return Ok(None);
                    };
                    let len = parse_length(&line)?;
                    if len > MAX_BULK_SIZE {
                        return Err(ParseError::MessageTooLarge {
                            size: len,
                            max: MAX_BULK_SIZE,
                        });
                    }
                    self.state = State::Payload { len, remaining };
                }
                State::Payload { len, remaining } => {
                    if self.buffer.len() < len + CRLF.len() {
                        return Ok(None);
                    }
                    if &self.buffer[len..len + CRLF.len()] != CRLF {
                        return Err(ParseError::MissingCrlf);
                    }

                    // Copy out so stored values don't pin the whole read buffer
                    self.args.push(Bytes::copy_from_slice(&self.buffer[..len]));
                    self.buffer.advance(len + CRLF.len());

                    if remaining == 1 {
                        self.state = State::Header;
                        return Ok(Some(Command::new(std::mem::take(&mut self.args))));
                    }
                    self.state = State::BulkLength {
                        remaining: remaining - 1,
                    };
                }
                State::Discard { at_line_start } => {
                    match find_frame_start(&self.buffer, at_line_start) {
                        Some(pos) => {
                            self.buffer.advance(pos);
                            self.state = State::Header;
                        }
                        None => {
                            let at_line_start = match self.buffer.last() {
                                Some(&last) => last == b'\n',
                                None => at_line_start,
                            };
                            self.buffer.clear();
                            self.state = State::Discard { at_line_start };
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }

    /// Removes one CRLF-terminated header line from the front of the buffer.
    fn take_line(&mut self) -> ParseResult<Option<BytesMut>> {
        let window = self.buffer.len().min(MAX_HEADER_LEN + CRLF.len());
        match find_crlf(&self.buffer[..window]) {
            Some(pos) => {
                let line = self.buffer.split_to(pos);
                self.buffer.advance(CRLF.len());
                Ok(Some(line))
            }
            None if window == MAX_HEADER_LEN + CRLF.len() => Err(ParseError::HeaderTooLong {
                max: MAX_HEADER_LEN,
            }),
            None => Ok(None),
        }
    }
}

/// Iterator returned by [`RespParser::commands`].
pub struct Commands<'a> {
    parser: &'a mut RespParser,
}

impl Iterator for Commands<'_> {
    type Item = ParseResult<Command>;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.next_command().transpose()
    }
}

fn parse_count(line: &[u8]) -> ParseResult<usize> {
    let text = header_text(line, prefix::ARRAY)?;
    parse_decimal(&text).ok_or(ParseError::InvalidCount(text))
}

fn parse_length(line: &[u8]) -> ParseResult<usize> {
    let text = header_text(line, prefix::BULK_STRING)?;
    parse_decimal(&text).ok_or(ParseError::InvalidLength(text))
}

/// Checks the type byte and returns the rest of the line as text.
fn header_text(line: &[u8], expected: u8) -> ParseResult<String> {
    match line.split_first() {
        Some((&found, rest)) if found == expected => {
            Ok(String::from_utf8_lossy(rest).into_owned())
        }
        Some((&found, _)) => Err(ParseError::UnexpectedPrefix { expected, found }),
        None => Err(ParseError::EmptyHeader),
    }
}

/// Digits only: no sign, no whitespace.
fn parse_decimal(text: &str) -> Option<usize> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Offset of the next `*` that begins a line.
fn find_frame_start(buf: &[u8], at_line_start: bool) -> Option<usize> {
    if at_line_start && buf.first() == Some(&prefix::ARRAY) {
        return Some(0);
    }
    buf.windows(2)
        .position(|w| w == [b'\n', prefix::ARRAY])
        .map(|pos| pos + 1)
}

/// Parses a single command from a standalone buffer.
///
/// This is a convenience function for simple use cases.
pub fn parse_command(buf: &[u8]) -> ParseResult<Option<Command>> {
    let mut parser = RespParser::with_capacity(buf.len());
    parser.extend(buf);
    parser.next_command()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(commands: &[Command]) -> Vec<&[u8]> {
        commands
            .iter()
            .map(|c| c.name().map(|n| n.as_ref()).unwrap_or_default())
            .collect()
    }

    fn drain(parser: &mut RespParser) -> Vec<Command> {
        parser.commands().map(|c| c.unwrap()).collect()
    }

    #[test]
    fn test_parse_ping() {
        let command = parse_command(b"*1\r\n$4\r\nPING\r\n").unwrap().unwrap();
        assert_eq!(command.name(), Some(&Bytes::from("PING")));
        assert!(command.args().is_empty());
    }

    #[test]
    fn test_parse_set_with_colon_in_key() {
        let input = b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$4\r\nAriz\r\n";
        let command = parse_command(input).unwrap().unwrap();
        assert_eq!(
            command.into_parts(),
            vec![
                Bytes::from("SET"),
                Bytes::from("user:101"),
                Bytes::from("Ariz")
            ]
        );
    }

    #[test]
    fn test_empty_bulk_argument() {
        let command = parse_command(b"*2\r\n$4\r\nECHO\r\n$0\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(command.args(), &[Bytes::new()]);
    }

    #[test]
    fn test_empty_array_is_empty_command() {
        let command = parse_command(b"*0\r\n").unwrap().unwrap();
        assert!(command.is_empty());
        assert!(command.name().is_none());
    }

    #[test]
    fn test_incomplete_header() {
        assert_eq!(parse_command(b"*1").unwrap(), None);
        assert_eq!(parse_command(b"*1\r").unwrap(), None);
        assert_eq!(parse_command(b"").unwrap(), None);
    }

    #[test]
    fn test_incomplete_payload() {
        assert_eq!(parse_command(b"*1\r\n$4\r\nPI").unwrap(), None);
        // Payload present, terminator not yet
        assert_eq!(parse_command(b"*1\r\n$4\r\nPING").unwrap(), None);
        assert_eq!(parse_command(b"*1\r\n$4\r\nPING\r").unwrap(), None);
    }

    #[test]
    fn test_frame_split_across_two_reads() {
        let mut parser = RespParser::new();
        parser.extend(b"*1\r\n$4\r\nPI");
        assert_eq!(parser.next_command().unwrap(), None);
        assert!(!parser.is_idle());

        parser.extend(b"NG\r\n");
        let commands = drain(&mut parser);
        assert_eq!(commands.len(), 1);
        assert_eq!(names(&commands), vec![b"PING".as_ref()]);
        assert!(parser.is_idle());
    }

    #[test]
    fn test_frame_fed_one_byte_at_a_time() {
        let input = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\nvalue\r\n";
        let mut parser = RespParser::new();
        let mut parsed = Vec::new();

        for byte in input.iter() {
            parser.extend(&[*byte]);
            parsed.extend(drain(&mut parser));
        }

        assert_eq!(parsed.len(), 1);
        assert_eq!(
            parsed[0].args(),
            &[Bytes::from("k"), Bytes::from("value")]
        );
        assert!(parser.is_idle());
    }

    #[test]
    fn test_pipelined_frames_in_one_read() {
        let mut parser = RespParser::new();
        parser.extend(b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n");

        let commands = drain(&mut parser);
        assert_eq!(
            names(&commands),
            vec![b"PING".as_ref(), b"ECHO".as_ref(), b"GET".as_ref()]
        );
        assert_eq!(parser.buffered_len(), 0);
    }

    #[test]
    fn test_pipelined_with_trailing_partial_frame() {
        let mut parser = RespParser::new();
        parser.extend(b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$3\r\nke");

        let first = drain(&mut parser);
        assert_eq!(names(&first), vec![b"PING".as_ref()]);

        parser.extend(b"y\r\n");
        let second = drain(&mut parser);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].args(), &[Bytes::from("key")]);
    }

    #[test]
    fn test_payload_may_contain_crlf_bytes_within_length() {
        // The length prefix, not the terminator, delimits the payload
        let command = parse_command(b"*2\r\n$4\r\nECHO\r\n$4\r\na\r\nb\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(command.args(), &[Bytes::from("a\r\nb")]);
    }

    #[test]
    fn test_invalid_count() {
        let result = parse_command(b"*x\r\n");
        assert_eq!(result, Err(ParseError::InvalidCount("x".to_string())));

        let result = parse_command(b"*-1\r\n");
        assert!(matches!(result, Err(ParseError::InvalidCount(_))));

        let result = parse_command(b"*\r\n");
        assert!(matches!(result, Err(ParseError::InvalidCount(_))));
    }

    #[test]
    fn test_invalid_length() {
        let result = parse_command(b"*1\r\n$abc\r\nPING\r\n");
        assert_eq!(result, Err(ParseError::InvalidLength("abc".to_string())));

        let result = parse_command(b"*1\r\n$-1\r\n");
        assert!(matches!(result, Err(ParseError::InvalidLength(_))));
    }

    #[test]
    fn test_wrong_prefix() {
        let result = parse_command(b"+PING\r\n");
        assert_eq!(
            result,
            Err(ParseError::UnexpectedPrefix {
                expected: b'*',
                found: b'+'
            })
        );

        let result = parse_command(b"*1\r\n:4\r\n");
        assert!(matches!(
            result,
            Err(ParseError::UnexpectedPrefix { expected: b'$', .. })
        ));
    }

    #[test]
    fn test_inline_commands_are_rejected() {
        let result = parse_command(b"PING\r\n");
        assert!(matches!(result, Err(ParseError::UnexpectedPrefix { .. })));
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        // Declared 3 bytes, sent 4
        let result = parse_command(b"*1\r\n$3\r\nPING\r\n");
        assert_eq!(result, Err(ParseError::MissingCrlf));
    }

    #[test]
    fn test_header_too_long() {
        let mut input = b"*".to_vec();
        input.extend(std::iter::repeat(b'1').take(MAX_HEADER_LEN + 8));
        let result = parse_command(&input);
        assert_eq!(
            result,
            Err(ParseError::HeaderTooLong {
                max: MAX_HEADER_LEN
            })
        );
    }

    #[test]
    fn test_oversized_bulk_rejected() {
        let input = format!("*1\r\n${}\r\n", MAX_BULK_SIZE + 1);
        let result = parse_command(input.as_bytes());
        assert!(matches!(result, Err(ParseError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_too_many_arguments() {
        let input = format!("*{}\r\n", MAX_ARGS + 1);
        let result = parse_command(input.as_bytes());
        assert!(matches!(result, Err(ParseError::TooManyArguments { .. })));
    }

    #[test]
    fn test_error_skips_to_next_read() {
        let mut parser = RespParser::new();
        parser.extend(b"*1\r\n$zz\r\nPING\r\n");

        let mut commands = parser.commands();
        assert!(matches!(
            commands.next(),
            Some(Err(ParseError::InvalidLength(_)))
        ));
        assert!(commands.next().is_none());
        assert!(parser.is_idle());

        parser.extend(b"*1\r\n$4\r\nPING\r\n");
        let commands = drain(&mut parser);
        assert_eq!(names(&commands), vec![b"PING".as_ref()]);
    }

    #[test]
    fn test_frame_after_malformed_one_in_same_buffer() {
        let mut parser = RespParser::new();
        // Declared 3 bytes, sent 4; the second frame is fine
        parser.extend(b"*1\r\n$3\r\nPING\r\n*1\r\n$4\r\nPING\r\n");

        let results: Vec<_> = parser.commands().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Err(ParseError::MissingCrlf));
        assert_eq!(
            results[1].as_ref().map(|c| c.name().cloned()),
            Ok(Some(Bytes::from("PING")))
        );
        assert!(parser.is_idle());
    }

    #[test]
    fn test_bad_header_line_then_valid_frame() {
        let mut parser = RespParser::new();
        parser.extend(b"*x\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n");

        let mut commands = parser.commands();
        assert_eq!(
            commands.next(),
            Some(Err(ParseError::InvalidCount("x".to_string())))
        );
        let echo = commands.next().unwrap().unwrap();
        assert_eq!(echo.args(), &[Bytes::from("hi")]);
        assert!(commands.next().is_none());
    }

    #[test]
    fn test_discard_continues_across_reads() {
        let mut input = b"*".to_vec();
        input.extend(std::iter::repeat(b'1').take(MAX_HEADER_LEN + 8));

        let mut parser = RespParser::new();
        parser.extend(&input);
        assert!(matches!(
            parser.next_command(),
            Err(ParseError::HeaderTooLong { .. })
        ));

        // The rest of the oversized line arrives later and is still skipped
        parser.extend(b"1111");
        assert_eq!(parser.next_command(), Ok(None));

        parser.extend(b"\r\n*1\r\n$4\r\nPING\r\n");
        let commands = drain(&mut parser);
        assert_eq!(names(&commands), vec![b"PING".as_ref()]);
        assert!(parser.is_idle());
    }

    #[test]
    fn test_need_more_is_not_an_error() {
        // Every strict prefix of a valid frame is "incomplete", never an error
        let input = b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n";
        for end in 0..input.len() {
            assert_eq!(parse_command(&input[..end]), Ok(None), "prefix len {}", end);
        }
        assert!(parse_command(input).unwrap().is_some());
    }
}
