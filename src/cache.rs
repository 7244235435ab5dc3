//! TTL cache in front of relay lookups, persisted in a [`KvStore`].
//!
//! Entries are JSON-encoded [`CacheEntry`] values. Freshness is judged here,
//! the store only holds bytes. Fetch failures propagate even when a stale
//! entry exists; stale data is never served.

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BotError;
use crate::event::{Event, KIND_FOLLOWS, KIND_METADATA, KIND_MUTES};
use crate::memo::Memo;
use crate::relay::{Filter, Relay};
use crate::storage::KvStore;

/// Default staleness threshold for relay lookups.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Cached value plus the Unix time (seconds) it was fetched at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: u64,
}

/// Follow and mute lists of one author, with the time they were fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relation {
    pub follow_list: Event,
    pub mute_list: Event,
    #[serde(default)]
    pub fetched_at: u64,
}

impl Relation {
    pub fn follows(&self, pubkey: &str) -> bool {
        self.follow_list.references_pubkey(pubkey)
    }

    pub fn mutes(&self, pubkey: &str) -> bool {
        self.mute_list.references_pubkey(pubkey)
    }
}

/// Parsed kind 0 content. Arbitrary fields are kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Profile(pub Map<String, Value>);

/// Image URL lists fetched from third-party JSON endpoints, by list name.
pub type ImageMemo = Memo<Vec<String>>;

/// Relay lookups with persistent TTL caching.
pub struct RelayCache {
    store: Arc<dyn KvStore>,
    relay: Arc<dyn Relay>,
    memo: Arc<ImageMemo>,
    ttl: Duration,
}

impl RelayCache {
    pub fn new(
        store: Arc<dyn KvStore>,
        relay: Arc<dyn Relay>,
        memo: Arc<ImageMemo>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            relay,
            memo,
            ttl,
        }
    }

    pub fn relay(&self) -> &Arc<dyn Relay> {
        &self.relay
    }

    /// Return the cached value under `key` if it was fetched within the TTL
    /// as of `now`, otherwise call `fetcher` and cache its result.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        now: u64,
        fetcher: F,
    ) -> Result<T, BotError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BotError>>,
    {
        if let Some(raw) = self.store.get(key)? {
            match serde_json::from_slice::<CacheEntry<T>>(&raw) {
                Ok(entry) if !self.is_stale(entry.fetched_at, now) => {
                    tracing::debug!(key, fetched_at = entry.fetched_at, "cache hit");
                    return Ok(entry.value);
                }
                Ok(entry) => tracing::debug!(key, fetched_at = entry.fetched_at, "cache stale"),
                Err(e) => tracing::warn!(key, error = %e, "discarding unreadable cache entry"),
            }
        } else {
            tracing::debug!(key, "cache miss");
        }

        let value = fetcher().await?;
        let entry = CacheEntry {
            value,
            fetched_at: now,
        };
        let encoded = serde_json::to_vec(&entry).map_err(|e| BotError::Encoding(e.to_string()))?;
        // A failed write only costs a refetch next time.
        if let Err(e) = self.store.put(key, &encoded) {
            tracing::warn!(key, error = %e, "failed to persist cache entry");
        }
        Ok(entry.value)
    }

    /// Whether an entry fetched at `fetched_at` must be refreshed at `now`.
    pub fn is_stale(&self, fetched_at: u64, now: u64) -> bool {
        now.saturating_sub(fetched_at) > self.ttl.as_secs()
    }

    /// Follow and mute lists for `pubkey` (hex).
    pub async fn relation(&self, pubkey: &str) -> Result<Relation, BotError> {
        self.relation_at(pubkey, now_secs()).await
    }

    pub async fn relation_at(&self, pubkey: &str, now: u64) -> Result<Relation, BotError> {
        let key = format!("relation:{pubkey}");
        self.get_or_fetch(&key, now, move || async move {
            let follow_list = self.latest(KIND_FOLLOWS, pubkey, "follow list").await?;
            let mute_list = self.latest(KIND_MUTES, pubkey, "mute list").await?;
            Ok(Relation {
                follow_list,
                mute_list,
                fetched_at: now,
            })
        })
        .await
    }

    /// Profile metadata for `pubkey` (hex).
    pub async fn profile(&self, pubkey: &str) -> Result<Profile, BotError> {
        self.profile_at(pubkey, now_secs()).await
    }

    pub async fn profile_at(&self, pubkey: &str, now: u64) -> Result<Profile, BotError> {
        let key = format!("profile:{pubkey}");
        self.get_or_fetch(&key, now, move || async move {
            let metadata = self.latest(KIND_METADATA, pubkey, "profile").await?;
            serde_json::from_str::<Profile>(&metadata.content).map_err(|e| {
                BotError::Decode(format!("profile content of {pubkey} is not an object: {e}"))
            })
        })
        .await
    }

    /// Drop the in-process memoized collections. Persistent entries stay and
    /// age out through the TTL.
    pub fn invalidate_all(&self) {
        self.memo.invalidate_all();
    }

    async fn latest(&self, kind: u32, pubkey: &str, what: &str) -> Result<Event, BotError> {
        self.relay
            .query(&Filter::latest(kind, pubkey))
            .await?
            .ok_or_else(|| BotError::NotFound(format!("{what} of {pubkey}")))
    }
}

/// Current Unix time in seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Relay answering from a fixed list and counting queries.
    #[derive(Default)]
    struct FakeRelay {
        events: Mutex<Vec<Event>>,
        queries: AtomicUsize,
        down: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Relay for FakeRelay {
        async fn query(&self, filter: &Filter) -> Result<Option<Event>, BotError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(BotError::RelayUnavailable("down".into()));
            }
            Ok(self
                .events
                .lock()
                .iter()
                .filter(|e| filter.matches(e))
                .max_by_key(|e| e.created_at)
                .cloned())
        }
    }

    fn event(kind: u32, pubkey: &str, tags: Vec<Tag>, content: &str) -> Event {
        Event {
            id: format!("{kind}-{pubkey}"),
            pubkey: pubkey.into(),
            kind,
            created_at: 1,
            tags,
            content: content.into(),
            sig: String::new(),
        }
    }

    fn cache_with(relay: Arc<FakeRelay>) -> RelayCache {
        RelayCache::new(
            Arc::new(MemoryStore::new()),
            relay,
            Arc::new(ImageMemo::new()),
            DEFAULT_TTL,
        )
    }

    #[tokio::test]
    async fn ttl_controls_refetch() {
        let cache = cache_with(Arc::new(FakeRelay::default()));
        let counter = AtomicUsize::new(0);
        let fetches = &counter;
        let fetch = move |v: u32| {
            move || async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BotError>(v)
            }
        };

        assert_eq!(cache.get_or_fetch("abc", 0, fetch(1)).await.unwrap(), 1);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        // within the TTL the cached value comes back unchanged
        assert_eq!(cache.get_or_fetch("abc", 1000, fetch(2)).await.unwrap(), 1);
        assert_eq!(cache.get_or_fetch("abc", 1800, fetch(3)).await.unwrap(), 1);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        // past 1800 s the entry is stale
        assert_eq!(cache.get_or_fetch("abc", 1900, fetch(4)).await.unwrap(), 4);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        // other keys are independent
        assert_eq!(cache.get_or_fetch("xyz", 1900, fetch(5)).await.unwrap(), 5);
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fetch_failure_with_stale_entry_propagates() {
        let cache = cache_with(Arc::new(FakeRelay::default()));
        cache
            .get_or_fetch("k", 0, || async { Ok::<_, BotError>(1u32) })
            .await
            .unwrap();
        let err = cache
            .get_or_fetch("k", 5000, || async {
                Err::<u32, _>(BotError::RelayUnavailable("x".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::RelayUnavailable(_)));
    }

    #[tokio::test]
    async fn unreadable_entry_is_refetched() {
        let store = Arc::new(MemoryStore::new());
        store.put("k", b"not json").unwrap();
        let cache = RelayCache::new(
            store,
            Arc::new(FakeRelay::default()),
            Arc::new(ImageMemo::new()),
            DEFAULT_TTL,
        );
        let v = cache
            .get_or_fetch("k", 10, || async { Ok::<_, BotError>(9u32) })
            .await
            .unwrap();
        assert_eq!(v, 9);
    }

    #[tokio::test]
    async fn relation_is_cached_and_queried() {
        let relay = Arc::new(FakeRelay::default());
        relay.events.lock().extend([
            event(KIND_FOLLOWS, "alice", vec![Tag::new(["p", "bob"])], ""),
            event(KIND_MUTES, "alice", vec![Tag::new(["p", "carol"])], ""),
        ]);
        let cache = cache_with(relay.clone());

        let rel = cache.relation_at("alice", 100).await.unwrap();
        assert!(rel.follows("bob"));
        assert!(!rel.follows("carol"));
        assert!(rel.mutes("carol"));
        assert_eq!(relay.queries.load(Ordering::SeqCst), 2);

        relay.down.store(true, Ordering::SeqCst);
        let again = cache.relation_at("alice", 200).await.unwrap();
        assert_eq!(again, rel);
        // a cache hit reports when the lists were fetched, not when asked
        assert_eq!(again.fetched_at, 100);
        assert_eq!(relay.queries.load(Ordering::SeqCst), 2);

        let err = cache.relation_at("alice", 100 + 1801).await.unwrap_err();
        assert!(matches!(err, BotError::RelayUnavailable(_)));
    }

    #[tokio::test]
    async fn relation_without_lists_is_not_found() {
        let relay = Arc::new(FakeRelay::default());
        relay
            .events
            .lock()
            .push(event(KIND_FOLLOWS, "alice", vec![], ""));
        let cache = cache_with(relay);
        assert!(matches!(
            cache.relation_at("nobody", 1).await,
            Err(BotError::NotFound(_))
        ));
        // the mute list is required too
        assert!(matches!(
            cache.relation_at("alice", 1).await,
            Err(BotError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn profile_parses_metadata() {
        let relay = Arc::new(FakeRelay::default());
        relay.events.lock().extend([
            event(
                KIND_METADATA,
                "alice",
                vec![],
                r#"{"display_name":"  ","name":" Alice ","picture":"https://example.com/a.png"}"#,
            ),
            event(KIND_METADATA, "broken", vec![], "[1,2]"),
        ]);
        let cache = cache_with(relay);
        let profile = cache.profile_at("alice", 1).await.unwrap();
        assert_eq!(profile.0["name"], " Alice ");
        assert_eq!(profile.0["picture"], "https://example.com/a.png");
        assert!(matches!(
            cache.profile_at("broken", 1).await,
            Err(BotError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn invalidate_all_clears_memo_only() {
        let store = Arc::new(MemoryStore::new());
        let memo = Arc::new(ImageMemo::new());
        let cache = RelayCache::new(
            store.clone(),
            Arc::new(FakeRelay::default()),
            memo.clone(),
            DEFAULT_TTL,
        );
        memo.get_or_populate("shio", || async { Ok::<_, ()>(vec!["x".to_string()]) })
            .await
            .unwrap();
        cache
            .get_or_fetch("k", 1, || async { Ok::<_, BotError>(1u32) })
            .await
            .unwrap();

        cache.invalidate_all();
        assert_eq!(memo.len(), 0);
        assert!(store.get("k").unwrap().is_some());
    }
}
