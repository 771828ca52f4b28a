//! Encoding, decoding and file I/O for the two persisted files.

use super::{PersistenceConfig, PersistenceError};
use crate::storage::{Entry, StorageEngine};
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

const SEPARATOR: u8 = b':';

/// A paired reading of the monotonic and wall clocks.
///
/// Deadlines live in memory as [`Instant`]s but on disk as unix seconds;
/// converting between them needs both clocks sampled at the same moment.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    pub now: Instant,
    pub wall: SystemTime,
}

impl Clock {
    pub fn now() -> Self {
        Self {
            now: Instant::now(),
            wall: SystemTime::now(),
        }
    }

    /// Unix seconds at `deadline`, rounded up so a reloaded key never
    /// expires early. None if the wall clock cannot represent it.
    pub fn to_unix_seconds(&self, deadline: Instant) -> Option<u64> {
        let remaining = deadline.saturating_duration_since(self.now);
        let since_epoch = self
            .wall
            .checked_add(remaining)?
            .duration_since(SystemTime::UNIX_EPOCH)
            .ok()?;

        let rounded_up = u64::from(since_epoch.subsec_nanos() > 0);
        Some(since_epoch.as_secs().saturating_add(rounded_up))
    }

    /// Deadline for a persisted expiry.
    ///
    /// None if it has already passed; `Some(None)` if it lies too far out
    /// to represent, in which case the key never expires.
    pub fn deadline_from_unix(&self, secs: u64) -> Option<Option<Instant>> {
        let target = SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(secs))?;
        let remaining = target.duration_since(self.wall).ok()?;
        if remaining.is_zero() {
            return None;
        }
        Some(self.now.checked_add(remaining))
    }
}

/// Contents of both files for one dump.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Encoded {
    pub data: Vec<u8>,
    pub expiry: Vec<u8>,
}

/// Renders entries as the data and expiry file contents.
pub fn encode(entries: &[(Bytes, Entry)], clock: Clock) -> Encoded {
    let mut encoded = Encoded::default();

    for (key, entry) in entries {
        push_line(&mut encoded.data, key, &entry.value);

        if let Some(secs) = entry
            .expires_at
            .and_then(|deadline| clock.to_unix_seconds(deadline))
        {
            push_line(&mut encoded.expiry, key, secs.to_string().as_bytes());
        }
    }

    encoded
}

fn push_line(out: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    out.extend_from_slice(key);
    out.push(SEPARATOR);
    out.extend_from_slice(value);
    out.push(b'\n');
}

/// Rebuilds entries from the data and expiry file contents.
///
/// Malformed lines are skipped with a warning. Keys whose expiry has passed
/// are left out. Expiry lines for keys with no data line are ignored.
pub fn decode(
    data: &[u8],
    expiry: &[u8],
    config: &PersistenceConfig,
    clock: Clock,
) -> Vec<(Bytes, Entry)> {
    let mut deadlines: HashMap<&[u8], u64> = HashMap::new();
    for (line_no, key, raw) in records(expiry, &config.expiry_path) {
        let parsed = std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse::<u64>().ok());
        match parsed {
            Some(secs) => {
                deadlines.insert(key, secs);
            }
            None => warn!(
                path = %config.expiry_path.display(),
                line = line_no,
                "Skipping expiry line with a non-numeric timestamp"
            ),
        }
    }

    let mut entries = Vec::new();
    let mut expired = 0usize;
    for (_, key, value) in records(data, &config.data_path) {
        let mut entry = Entry::new(Bytes::copy_from_slice(value));

        if let Some(&secs) = deadlines.get(key) {
            match clock.deadline_from_unix(secs) {
                Some(deadline) => entry.expires_at = deadline,
                None => {
                    expired += 1;
                    continue;
                }
            }
        }

        entries.push((Bytes::copy_from_slice(key), entry));
    }

    if expired > 0 {
        debug!(expired, "Skipped keys that expired while offline");
    }
    entries
}

/// Yields `(line number, key, value)` for each well-formed line.
fn records<'a>(
    contents: &'a [u8],
    path: &'a Path,
) -> impl Iterator<Item = (usize, &'a [u8], &'a [u8])> + 'a {
    contents
        .split(|&b| b == b'\n')
        .enumerate()
        .filter_map(move |(idx, line)| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                return None;
            }

            match line.iter().position(|&b| b == SEPARATOR) {
                Some(pos) => Some((idx + 1, &line[..pos], &line[pos + 1..])),
                None => {
                    warn!(
                        path = %path.display(),
                        line = idx + 1,
                        "Skipping line without a ':' separator"
                    );
                    None
                }
            }
        })
}

/// Loads both files into `engine`. Returns the number of keys loaded.
///
/// A missing data file means a first run and loads nothing. A missing
/// expiry file means no key has a TTL.
pub async fn load(
    engine: &StorageEngine,
    config: &PersistenceConfig,
) -> Result<usize, PersistenceError> {
    let Some(data) = read_optional(&config.data_path).await? else {
        info!(
            path = %config.data_path.display(),
            "No data file found, starting with an empty store"
        );
        return Ok(0);
    };
    let expiry = read_optional(&config.expiry_path).await?.unwrap_or_default();

    let entries = decode(&data, &expiry, config, Clock::now());
    let loaded = engine.restore(entries);

    info!(
        path = %config.data_path.display(),
        keys = loaded,
        "Loaded persisted store"
    );
    Ok(loaded)
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, PersistenceError> {
    match tokio::fs::read(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PersistenceError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes a consistent snapshot of `engine` to both files.
///
/// Each file is written to `<file>.tmp` and renamed over the original, so
/// a reader never sees a half-written file and nothing from an earlier,
/// longer dump survives. Returns the number of keys written.
pub async fn save(
    engine: &StorageEngine,
    config: &PersistenceConfig,
) -> Result<usize, PersistenceError> {
    let entries = engine.snapshot();
    let encoded = encode(&entries, Clock::now());

    write_replace(&config.data_path, &encoded.data).await?;
    write_replace(&config.expiry_path, &encoded.expiry).await?;

    Ok(entries.len())
}

async fn write_replace(path: &Path, contents: &[u8]) -> Result<(), PersistenceError> {
    let write_err = |source: io::Error| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> PersistenceConfig {
        PersistenceConfig {
            data_path: dir.join("data.txt"),
            expiry_path: dir.join("expiry.txt"),
            interval: Duration::from_millis(20),
        }
    }

    fn sorted_lines(path: &Path) -> Vec<String> {
        let contents = std::fs::read_to_string(path).unwrap();
        let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
        lines.sort();
        lines
    }

    fn fixed_clock() -> Clock {
        Clock {
            now: Instant::now(),
            wall: SystemTime::UNIX_EPOCH + Duration::from_secs(1_000),
        }
    }

    // ── Clock conversions ─────────────────────────────────────────────────

    #[test]
    fn unix_seconds_round_up() {
        let clock = fixed_clock();

        let deadline = clock.now + Duration::from_millis(1_500);
        assert_eq!(clock.to_unix_seconds(deadline), Some(1_002));

        let deadline = clock.now + Duration::from_secs(5);
        assert_eq!(clock.to_unix_seconds(deadline), Some(1_005));
    }

    #[test]
    fn past_deadline_is_not_restored() {
        let clock = fixed_clock();

        assert!(clock.deadline_from_unix(999).is_none());
        assert!(clock.deadline_from_unix(1_000).is_none());
        assert_eq!(
            clock.deadline_from_unix(1_010),
            Some(Some(clock.now + Duration::from_secs(10)))
        );
    }

    // ── Encoding ──────────────────────────────────────────────────────────

    #[test]
    fn encode_writes_expiry_only_for_ttl_keys() {
        let clock = fixed_clock();
        let entries = vec![
            (Bytes::from("a"), Entry::new(Bytes::from("1"))),
            (
                Bytes::from("b"),
                Entry {
                    value: Bytes::from("2"),
                    expires_at: Some(clock.now + Duration::from_secs(60)),
                },
            ),
        ];

        let encoded = encode(&entries, clock);
        assert_eq!(encoded.data, b"a:1\nb:2\n");
        assert_eq!(encoded.expiry, b"b:1060\n");
    }

    #[test]
    fn decode_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let data = b"a:1\ngarbage\n\nb:x:y\r\nc:\n";
        let expiry = b"a:not-a-number\nnocolon\nghost:99999999999\n";

        let mut entries = decode(data, expiry, &config, Clock::now());
        entries.sort_by(|x, y| x.0.cmp(&y.0));

        let keys: Vec<&[u8]> = entries.iter().map(|(k, _)| k.as_ref()).collect();
        assert_eq!(keys, vec![&b"a"[..], b"b", b"c"]);

        // Split on the first separator only; CR stripped
        assert_eq!(entries[1].1.value, Bytes::from("x:y"));
        assert_eq!(entries[2].1.value, Bytes::new());
        // Bad expiry line leaves the key without a TTL
        assert!(entries[0].1.expires_at.is_none());
    }

    // ── Save / load ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let engine = StorageEngine::new();
        engine.set(Bytes::from("a"), Bytes::from("1"));
        engine.set(Bytes::from("b"), Bytes::from("2"));

        assert_eq!(save(&engine, &config).await.unwrap(), 2);
        assert_eq!(sorted_lines(&config.data_path), vec!["a:1", "b:2"]);
        assert_eq!(std::fs::read(&config.expiry_path).unwrap(), b"");

        let restored = StorageEngine::new();
        assert_eq!(load(&restored, &config).await.unwrap(), 2);
        assert_eq!(restored.get(b"a"), Some(Bytes::from("1")));
        assert_eq!(restored.get(b"b"), Some(Bytes::from("2")));
        assert_eq!(restored.len(), 2);
    }

    #[tokio::test]
    async fn ttl_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let engine = StorageEngine::new();
        engine.set_with_ttl(
            Bytes::from("session"),
            Bytes::from("token"),
            Duration::from_secs(3600),
        );
        save(&engine, &config).await.unwrap();

        let restored = StorageEngine::new();
        load(&restored, &config).await.unwrap();

        let snapshot = restored.snapshot();
        assert_eq!(snapshot.len(), 1);
        let remaining = snapshot[0]
            .1
            .remaining_at(Instant::now())
            .expect("TTL should be restored");
        assert!(
            remaining > Duration::from_secs(3590) && remaining <= Duration::from_secs(3601),
            "TTL should be ~3600s, got {:?}",
            remaining
        );
    }

    #[tokio::test]
    async fn shorter_dump_replaces_longer_one() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let engine = StorageEngine::new();
        for i in 0..10 {
            engine.set_with_ttl(
                Bytes::from(format!("long-key-{}", i)),
                Bytes::from("a fairly long value"),
                Duration::from_secs(600),
            );
        }
        save(&engine, &config).await.unwrap();

        let smaller = StorageEngine::new();
        smaller.set(Bytes::from("a"), Bytes::from("1"));
        save(&smaller, &config).await.unwrap();

        assert_eq!(std::fs::read(&config.data_path).unwrap(), b"a:1\n");
        assert_eq!(std::fs::read(&config.expiry_path).unwrap(), b"");
        assert!(!temp_path(&config.data_path).exists());
        assert!(!temp_path(&config.expiry_path).exists());
    }

    #[tokio::test]
    async fn missing_files_load_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let engine = StorageEngine::new();
        assert_eq!(load(&engine, &config).await.unwrap(), 0);
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn missing_expiry_file_means_no_ttls() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(&config.data_path, "k:v\n").unwrap();

        let engine = StorageEngine::new();
        assert_eq!(load(&engine, &config).await.unwrap(), 1);
        assert!(engine.snapshot()[0].1.expires_at.is_none());
    }

    #[tokio::test]
    async fn expired_keys_are_not_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(&config.data_path, "old:v\nfresh:v\n").unwrap();
        std::fs::write(&config.expiry_path, "old:1\n").unwrap();

        let engine = StorageEngine::new();
        assert_eq!(load(&engine, &config).await.unwrap(), 1);
        assert!(!engine.contains_key(b"old"));
        assert!(engine.contains_key(b"fresh"));
    }

    #[tokio::test]
    async fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir.path().join("nested").join("state"));

        let engine = StorageEngine::new();
        engine.set(Bytes::from("k"), Bytes::from("v"));
        save(&engine, &config).await.unwrap();

        assert_eq!(std::fs::read(&config.data_path).unwrap(), b"k:v\n");
    }

    #[tokio::test]
    async fn unreadable_data_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        // A directory cannot be read as a file
        config.data_path = dir.path().to_path_buf();

        let engine = StorageEngine::new();
        let result = load(&engine, &config).await;
        assert!(matches!(result, Err(PersistenceError::Read { .. })));
    }
}
