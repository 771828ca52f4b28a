//! # ttlkv - An In-Memory Key-Value Server with TTLs
//!
//! ttlkv speaks a small subset of the Redis protocol over TCP: `PING`,
//! `ECHO`, `SET` (with an optional `PX` time-to-live) and `GET`. The whole
//! store is periodically written to two plain text files and reloaded from
//! them on startup.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               ttlkv                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │                     ┌─────────────┐    ┌──────────────────────────┐     │
//! │                     │    RESP     │    │      StorageEngine       │     │
//! │                     │   Parser    │    │  Mutex<HashMap<..>>      │     │
//! │                     └─────────────┘    └──────────────────────────┘     │
//! │                                          ▲                 ▲            │
//! │                                          │                 │            │
//! │                     ┌────────────────────┴───┐  ┌──────────┴─────────┐  │
//! │                     │   PersistenceSync      │  │   ExpirySweeper    │  │
//! │                     │ data.txt / expiry.txt  │  │     (opt-in)       │  │
//! │                     └────────────────────────┘  └────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use ttlkv::commands::CommandHandler;
//! use ttlkv::connection::{handle_connection, ConnectionStats};
//! use ttlkv::persistence::{self, PersistenceConfig, PersistenceSync};
//! use ttlkv::storage::StorageEngine;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = Arc::new(StorageEngine::new());
//!     let persistence = PersistenceConfig::default();
//!
//!     persistence::load(&storage, &persistence).await?;
//!     let _sync = PersistenceSync::start(Arc::clone(&storage), persistence);
//!
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         let handler = CommandHandler::new(Arc::clone(&storage));
//!         tokio::spawn(handle_connection(stream, addr, handler, Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `ECHO message`
//! - `SET key value [PX milliseconds]`
//! - `GET key`
//!
//! ## Module Overview
//!
//! - [`protocol`]: incremental request parser and reply types
//! - [`storage`]: the shared TTL store and the optional expiry sweeper
//! - [`commands`]: command validation and dispatch
//! - [`connection`]: per-client read/execute/reply loop
//! - [`persistence`]: loading and periodically dumping the store
//! - [`config`]: command-line flags
//!
//! ## Expiry
//!
//! Keys with a TTL are removed lazily: a `GET` that finds an expired key
//! deletes it and answers as if it were never there. With `--active-expiry`
//! the store also keeps its deadlines in a min-heap and a background task
//! removes keys as they come due, whether or not anyone reads them.

pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod storage;

use std::time::Duration;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::{Config, Invocation};
pub use connection::{handle_connection, ConnectionStats};
pub use persistence::{PersistenceConfig, PersistenceSync};
pub use protocol::{ParseError, RespParser, RespValue};
pub use storage::{ExpiryConfig, ExpirySweeper, StorageEngine};

/// The default port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host to bind to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default file for `key:value` lines
pub const DEFAULT_DATA_FILE: &str = "data.txt";

/// Default file for `key:unix_seconds` lines
pub const DEFAULT_EXPIRY_FILE: &str = "expiry.txt";

/// Default time between dumps to disk
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Version of ttlkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
