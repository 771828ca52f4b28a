//! Connection Handler
//!
//! Each client gets its own handler task that loops over
//! read → parse → execute → reply until the client goes away.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects, handler spawned
//!        │
//!        ▼
//! 2. ┌──────────────────────────────────┐
//!    │  Read a chunk into the parser    │◄─┐
//!    │  For each complete command:      │  │
//!    │    execute, write reply          │  │
//!    │  Flush replies                   │──┘
//!    └──────────────────────────────────┘
//!        │ EOF or I/O error
//!        ▼
//! 3. Handler task ends (other connections unaffected)
//! ```
//!
//! ## Buffer Management
//!
//! Bytes are read straight into the parser's `BytesMut`. A read may end in
//! the middle of a frame or carry several frames; the parser keeps whatever
//! is incomplete for the next read, and replies go out in the order the
//! commands were parsed.

use crate::commands::CommandHandler;
use crate::protocol::{RespParser, RespValue};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, trace, warn};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Free space kept available in the read buffer before each read
const MIN_READ_SPACE: usize = 1024;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands executed, rejected ones included
    pub commands_processed: AtomicU64,
    /// Commands answered with an error reply
    pub commands_rejected: AtomicU64,
    /// Malformed frames
    pub protocol_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self, accepted: bool) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
        if !accepted {
            self.commands_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
///
/// Owns the stream and the parser state for one client; nothing else about
/// the connection is shared.
pub struct ConnectionHandler<S> {
    /// The client stream; reads bypass the write buffer
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Frame parser, owns the read buffer
    parser: RespParser,

    /// The command handler (shared storage)
    command_handler: CommandHandler,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The client stream (a `TcpStream` in production)
    /// * `addr` - The client's socket address
    /// * `command_handler` - The command handler for executing commands
    /// * `stats` - Shared connection statistics
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            parser: RespParser::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            stats,
        }
    }

    /// Runs the connection loop until the client disconnects or an I/O error occurs.
    ///
    /// A clean disconnect between frames returns `Ok(())`.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e @ ConnectionError::UnexpectedEof { .. }) => {
                debug!(client = %self.addr, error = %e, "Client disconnected mid-frame")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            if self.read_more_data().await? == 0 {
                if self.parser.is_idle() {
                    return Ok(());
                }
                return Err(ConnectionError::UnexpectedEof {
                    buffered: self.parser.buffered_len(),
                });
            }

            self.process_buffered().await?;
        }
    }

    /// Reads more data from the stream into the parser's buffer.
    ///
    /// Returns the number of bytes read; 0 means end of stream.
    async fn read_more_data(&mut self) -> Result<usize, ConnectionError> {
        let buffer = self.parser.buffer_mut();
        if buffer.capacity() - buffer.len() < MIN_READ_SPACE {
            buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(buffer).await?;

        if n > 0 {
            self.stats.bytes_read(n);
            trace!(client = %self.addr, bytes = n, "Read data");
        }
        Ok(n)
    }

    /// Executes every complete command in the buffer and sends the replies.
    async fn process_buffered(&mut self) -> Result<(), ConnectionError> {
        let mut written = 0;

        for frame in self.parser.commands() {
            let response = match frame {
                Ok(command) => {
                    let (response, accepted) = self.command_handler.execute(command);
                    self.stats.command_processed(accepted);
                    if !accepted {
                        debug!(client = %self.addr, reply = %response, "Command rejected");
                    }
                    response
                }
                Err(e) => {
                    self.stats.protocol_error();
                    warn!(client = %self.addr, error = %e, "Protocol error, skipping to the next frame");
                    RespValue::error(format!("ERR Protocol error: {}", e))
                }
            };

            let bytes = response.serialize();
            self.stream.write_all(&bytes).await?;
            written += bytes.len();
        }

        if written > 0 {
            self.stream.flush().await?;
            self.stats.bytes_written(written);
            trace!(client = %self.addr, bytes = written, "Sent responses");
        } else {
            trace!(
                client = %self.addr,
                buffered = self.parser.buffered_len(),
                "Incomplete command, need more data"
            );
        }

        Ok(())
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client closed the stream in the middle of a frame
    #[error("unexpected end of stream with {buffered} bytes of a partial frame buffered")]
    UnexpectedEof { buffered: usize },
}

/// Handles a client connection to completion.
///
/// Errors are logged by the handler itself; nothing is propagated to the
/// accept loop.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    let _ = handler.run().await;
}
