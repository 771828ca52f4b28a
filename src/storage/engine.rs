//! Thread-Safe Storage Engine with Expiry Support
//!
//! The engine is a `HashMap<Bytes, Entry>` behind one mutex. Every operation
//! (a SET, a GET with its possible lazy deletion, a persistence snapshot)
//! holds the lock for exactly that operation, so no caller can observe a
//! value paired with a stale expiry.
//!
//! ## Expiry
//!
//! Expiry is lazy: an entry whose deadline has passed stays in the map until
//! the next lookup of that key removes it. A store created with
//! [`StorageEngine::with_active_expiry`] additionally keeps a min-heap of
//! deadlines so that [`StorageEngine::cleanup_expired`] can reclaim keys that
//! are never read again (see [`crate::storage::expiry`]).

use crate::storage::expiry::ExpiryIndex;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates a new entry that expires `ttl` from now.
    ///
    /// A TTL too large to represent as an `Instant` yields an entry that never expires.
    pub fn with_ttl(value: Bytes, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Time left before expiry, or None if the entry never expires.
    pub fn remaining_at(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .map(|exp| exp.saturating_duration_since(now))
    }
}

/// Everything guarded by the engine's lock.
#[derive(Debug, Default)]
struct Keyspace {
    data: HashMap<Bytes, Entry>,
    /// Present only when active expiry is enabled
    index: Option<ExpiryIndex>,
}

impl Keyspace {
    /// Returns `true` if the key was not present before.
    fn insert(&mut self, key: Bytes, entry: Entry) -> bool {
        if let (Some(index), Some(deadline)) = (self.index.as_mut(), entry.expires_at) {
            index.push(deadline, key.clone());
        }
        let created = self.data.insert(key, entry).is_none();

        // Overwrites and lazy removals leave stale deadlines behind
        if let Some(index) = self.index.as_mut().filter(|index| index.needs_compaction()) {
            index.rebuild(self.data.iter().filter_map(|(key, entry)| {
                entry.expires_at.map(|deadline| (deadline, key.clone()))
            }));
        }
        created
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    /// Entries removed because their TTL elapsed (lazy and swept)
    pub expired: u64,
}

/// The shared key-value store.
///
/// Wrap it in an `Arc` and hand a clone to every connection and to the
/// persistence task.
///
/// # Example
///
/// ```
/// use ttlkv::storage::StorageEngine;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"));
/// assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
///
/// engine.set_with_ttl(Bytes::from("session"), Bytes::from("abc123"), Duration::from_secs(60));
/// assert_eq!(engine.len(), 2);
/// ```
pub struct StorageEngine {
    keyspace: Mutex<Keyspace>,

    get_count: AtomicU64,
    set_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("keys", &self.len())
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty store with lazy expiry only.
    pub fn new() -> Self {
        Self::from_keyspace(Keyspace::default())
    }

    /// Creates an empty store that also indexes deadlines for [`cleanup_expired`](Self::cleanup_expired).
    pub fn with_active_expiry() -> Self {
        Self::from_keyspace(Keyspace {
            data: HashMap::new(),
            index: Some(ExpiryIndex::new()),
        })
    }

    fn from_keyspace(keyspace: Keyspace) -> Self {
        Self {
            keyspace: Mutex::new(keyspace),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// A panic while holding the lock cannot leave an entry half-written,
    /// so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Keyspace> {
        self.keyspace.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets a key-value pair without expiry, clearing any previous TTL.
    ///
    /// Returns `true` if a new key was created, `false` if an existing key was updated.
    pub fn set(&self, key: Bytes, value: Bytes) -> bool {
        self.set_count.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(key, Entry::new(value))
    }

    /// Sets a key-value pair that expires `ttl` from now.
    ///
    /// Returns `true` if a new key was created, `false` if an existing key was updated.
    pub fn set_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) -> bool {
        self.set_count.fetch_add(1, Ordering::Relaxed);
        let entry = Entry::with_ttl(value, ttl);
        self.lock().insert(key, entry)
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. An expired
    /// entry is removed as a side effect of the lookup.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let mut keyspace = self.lock();
        match keyspace.data.get(key) {
            None => return None,
            Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
            Some(_) => {}
        }

        keyspace.data.remove(key);
        self.expired_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Whether the key is physically stored, expired or not. Never triggers expiry.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.lock().data.contains_key(key)
    }

    /// Number of stored entries, including expired ones not yet removed.
    pub fn len(&self) -> u64 {
        self.lock().data.len() as u64
    }

    /// Returns true if the database is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies every live entry under a single lock acquisition.
    ///
    /// Expired entries are left out but not removed.
    pub fn snapshot(&self) -> Vec<(Bytes, Entry)> {
        let now = Instant::now();
        let keyspace = self.lock();
        keyspace
            .data
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Inserts previously persisted entries under a single lock acquisition.
    ///
    /// Returns the number of entries inserted.
    pub fn restore<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (Bytes, Entry)>,
    {
        let mut keyspace = self.lock();
        let mut restored = 0;
        for (key, entry) in entries {
            keyspace.insert(key, entry);
            restored += 1;
        }
        restored
    }

    /// Removes every entry whose deadline has passed.
    ///
    /// With active expiry enabled only due deadlines are visited; otherwise
    /// the whole map is scanned.
    ///
    /// Returns the number of keys removed.
    pub fn cleanup_expired(&self) -> u64 {
        let now = Instant::now();
        let mut keyspace = self.lock();
        let Keyspace { data, index } = &mut *keyspace;

        let removed = match index {
            Some(index) => index.drain_due(now, |key, deadline| {
                // The key may have been overwritten or lazily removed since
                // this deadline was recorded
                let current = data.get(key).and_then(|entry| entry.expires_at);
                if current == Some(deadline) {
                    data.remove(key);
                    true
                } else {
                    false
                }
            }),
            None => {
                let before = data.len();
                data.retain(|_, entry| !entry.is_expired_at(now));
                (before - data.len()) as u64
            }
        };

        if removed > 0 {
            self.expired_count.fetch_add(removed, Ordering::Relaxed);
        }
        removed
    }

    /// Returns database statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len(),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}
