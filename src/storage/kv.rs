//! Key/value store contract and its implementations.
//!
//! # Responsibilities
//! - Define the narrow store contract consumed by the nonce subsystem
//! - Persist entries durably (write-through, atomic file replace)
//! - Provide an in-memory store for tests and dry runs

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

/// Errors raised by a key/value store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure while reading or writing the store.
    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk file could not be (de)serialized.
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value did not match the expected layout.
    #[error("malformed value for key '{key}': {reason}")]
    Decode { key: String, reason: String },

    /// The store was used before `open` or after `close`.
    #[error("store '{0}' is not open")]
    Closed(String),
}

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// A durable string key/value store.
///
/// Implementations must be safe to share between threads and must not
/// return from `put` until the entry survives a process restart.
pub trait KeyValueStore: Send + Sync {
    /// Open the store. Opening an already open store is a no-op.
    fn open(&self) -> StorageResult<()>;

    /// Insert or overwrite `key`.
    fn put(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Every entry whose key starts with `prefix`, in key order.
    fn get_all(&self, prefix: &str) -> StorageResult<Vec<(String, String)>>;

    /// Close the store. Closing a closed store is a no-op.
    fn close(&self) -> StorageResult<()>;

    fn is_open(&self) -> bool;

    /// Human readable location, used in logs and errors.
    fn location(&self) -> String;
}

#[derive(Default)]
struct Entries {
    map: BTreeMap<String, String>,
    open: bool,
}

fn lock(entries: &Mutex<Entries>) -> MutexGuard<'_, Entries> {
    // A panic mid-write leaves the map as it was before the write.
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn matching(map: &BTreeMap<String, String>, prefix: &str) -> Vec<(String, String)> {
    map.range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// JSON-file backed store.
///
/// The whole map is rewritten to a sibling temp file and renamed over the
/// original on every `put`, so a crash leaves either the old or the new file.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl FileStore {
    /// Create a store for `path`. Nothing touches the disk until `open`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(Entries::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> StorageResult<BTreeMap<String, String>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    fn persist(&self, map: &BTreeMap<String, String>) -> StorageResult<()> {
        let tmp = self.path.with_extension("tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, map)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.sync_parent_dir()?;
        Ok(())
    }

    /// Make the rename itself durable.
    #[cfg(unix)]
    fn sync_parent_dir(&self) -> StorageResult<()> {
        match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => File::open(dir)?.sync_all()?,
            None => File::open(".")?.sync_all()?,
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_parent_dir(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn open(&self) -> StorageResult<()> {
        let mut entries = lock(&self.entries);
        if entries.open {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        entries.map = Self::load(&self.path)?;
        entries.open = true;
        tracing::info!(
            path = %self.path.display(),
            entries = entries.map.len(),
            "Opened key/value store"
        );
        Ok(())
    }

    fn put(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = lock(&self.entries);
        if !entries.open {
            return Err(StorageError::Closed(self.location()));
        }
        let previous = entries.map.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries.map) {
            // Keep memory consistent with what is on disk.
            match previous {
                Some(v) => entries.map.insert(key.to_string(), v),
                None => entries.map.remove(key),
            };
            return Err(e);
        }
        tracing::trace!(key = key, "Persisted store entry");
        Ok(())
    }

    fn get_all(&self, prefix: &str) -> StorageResult<Vec<(String, String)>> {
        let entries = lock(&self.entries);
        if !entries.open {
            return Err(StorageError::Closed(self.location()));
        }
        Ok(matching(&entries.map, prefix))
    }

    fn close(&self) -> StorageResult<()> {
        let mut entries = lock(&self.entries);
        if !entries.open {
            return Ok(());
        }
        // Every put already reached the disk; nothing left to flush.
        entries.map.clear();
        entries.open = false;
        tracing::info!(path = %self.path.display(), "Closed key/value store");
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.entries).open
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Volatile store. Contents survive `close`/`open` cycles but not the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn open(&self) -> StorageResult<()> {
        lock(&self.entries).open = true;
        Ok(())
    }

    fn put(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = lock(&self.entries);
        if !entries.open {
            return Err(StorageError::Closed(self.location()));
        }
        entries.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_all(&self, prefix: &str) -> StorageResult<Vec<(String, String)>> {
        let entries = lock(&self.entries);
        if !entries.open {
            return Err(StorageError::Closed(self.location()));
        }
        Ok(matching(&entries.map, prefix))
    }

    fn close(&self) -> StorageResult<()> {
        lock(&self.entries).open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.entries).open
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
