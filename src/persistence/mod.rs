//! Persistence Module
//!
//! Keeps the store on disk as two plain text files:
//!
//! ```text
//! data.txt            expiry.txt
//! ─────────           ──────────────────
//! name:Ariz           session:1767225600
//! session:token123
//! ```
//!
//! One `key:value` line per key in the data file, and one
//! `key:unix_seconds` line per key that has a TTL in the expiry file.
//! Keys must not contain `:` or a newline and values must not contain a
//! newline; nothing is escaped.
//!
//! The store is loaded once at startup ([`load`]) and rewritten from scratch
//! every sync interval by [`PersistenceSync`], which also writes a final
//! dump when it is shut down.

pub mod snapshot;
pub mod sync;

pub use snapshot::{load, save, Clock};
pub use sync::PersistenceSync;

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Where and how often the store is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// File holding `key:value` lines
    pub data_path: PathBuf,
    /// File holding `key:unix_seconds` lines
    pub expiry_path: PathBuf,
    /// Time between dumps
    pub interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(crate::DEFAULT_DATA_FILE),
            expiry_path: PathBuf::from(crate::DEFAULT_EXPIRY_FILE),
            interval: crate::DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// Errors reading or writing the persisted files.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}
