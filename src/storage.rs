//! Key/value backing stores for the relay cache.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Result;
use sha1::{Digest, Sha1};

#[cfg(test)]
use parking_lot::RwLock;
#[cfg(test)]
use std::collections::HashMap;

/// Byte-oriented key/value store. Reads and writes are atomic per key and the
/// last writer wins; freshness is decided by the caller.
pub trait KvStore: Send + Sync {
    /// Fetch the bytes stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Persistent store rooted at `root`, one file per key.
#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a new store rooted at `root`.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.root.join("kv"))?;
        Ok(())
    }

    /// Walk every stored entry and remove those for which `stale` returns true.
    /// Returns the number of files removed.
    pub fn purge(&self, mut stale: impl FnMut(&[u8]) -> bool) -> Result<usize> {
        let dir = self.root.join("kv");
        if !dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let data = fs::read(entry.path())?;
            if stale(&data) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Compute the path for a key. Keys are hashed so arbitrary strings
    /// (npubs, prefixes with `:`) map to safe, evenly sharded file names.
    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha1::new();
        hasher.update(key.as_bytes());
        let hash = hex::encode(hasher.finalize());
        self.root
            .join("kv")
            .join(&hash[0..2])
            .join(format!("{}.json", hash))
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        read_optional(&self.entry_path(key))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.entry_path(key);
        let parent_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent_dir)?;
        // Write to a temp file then rename so readers never see a partial entry.
        let tmp = tempfile::NamedTempFile::new_in(&parent_dir)?;
        fs::write(tmp.path(), value)?;
        tmp.persist(&path)?;
        Ok(())
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// In-process store for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}
