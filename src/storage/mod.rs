//! Storage Engine Module
//!
//! The shared TTL-aware key-value store and its optional expiry sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                StorageEngine                 │
//! │  Mutex<{ HashMap<Bytes, Entry>,              │
//! │          Option<ExpiryIndex> }>              │
//! └──────────────────────────────────────────────┘
//!        ▲                ▲                ▲
//!        │ get/set        │ snapshot       │ cleanup_expired
//!  ┌─────┴──────┐  ┌──────┴───────┐  ┌─────┴──────────┐
//!  │ Connection │  │ Persistence  │  │ ExpirySweeper  │
//!  │  handlers  │  │    sync      │  │   (opt-in)     │
//!  └────────────┘  └──────────────┘  └────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use ttlkv::storage::StorageEngine;
//! use bytes::Bytes;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let engine = Arc::new(StorageEngine::new());
//!
//! engine.set(Bytes::from("name"), Bytes::from("Ariz"));
//! assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
//!
//! engine.set_with_ttl(
//!     Bytes::from("session"),
//!     Bytes::from("token123"),
//!     Duration::from_secs(3600)
//! );
//! ```

pub mod engine;
pub mod expiry;

// Re-export commonly used types
pub use engine::{Entry, StorageEngine, StorageStats};
pub use expiry::{ExpiryConfig, ExpiryIndex, ExpirySweeper};
