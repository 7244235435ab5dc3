//! In-process memoization of externally fetched collections (image lists).
//!
//! Entries never expire on their own; they live until an administrator
//! triggers a flush.

use std::{collections::HashMap, future::Future, sync::Arc};

use parking_lot::RwLock;

/// Clear-on-signal cache keyed by collection name.
pub struct Memo<V> {
    entries: RwLock<HashMap<String, Arc<V>>>,
}

impl<V> Default for Memo<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> Memo<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the memoized value for `key`, running `loader` on a miss.
    ///
    /// Loader errors are returned as-is and nothing is stored. Two callers
    /// racing on the same missing key may both load; the last one wins.
    pub async fn get_or_populate<E, F, Fut>(&self, key: &str, loader: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cached = self.entries.read().get(key).cloned();
        if let Some(v) = cached {
            return Ok(v);
        }
        tracing::debug!(key, "memo miss");
        let value = Arc::new(loader().await?);
        self.entries
            .write()
            .insert(key.to_string(), Arc::clone(&value));
        Ok(value)
    }

    /// Drop one memoized collection.
    pub fn invalidate(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Drop every memoized collection.
    pub fn invalidate_all(&self) {
        let mut entries = self.entries.write();
        tracing::info!(count = entries.len(), "flushing memoized collections");
        entries.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}
