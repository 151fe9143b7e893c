//! A small in-process TTL cache.
//!
//! This is the volatile fast tier used by both the idempotency gate and the totals read path. Entries are advisory:
//! dropping any (or all) of them at any point only costs a re-read from the durable tier, never correctness.
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A clonable handle to a shared TTL map. Clones share the same underlying store, so one handle can be given to the
/// request path and another to the invalidation worker.
#[derive(Debug)]
pub struct TtlCache<V> {
    default_ttl: Duration,
    entries: Arc<RwLock<HashMap<String, Entry<V>>>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self { default_ttl: self.default_ttl, entries: Arc::clone(&self.entries) }
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self { default_ttl, entries: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Fetch a live entry. Expired entries are treated as absent and dropped on the way out.
    pub async fn get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => return Some(entry.value.clone()),
                Some(_) => {},
                None => return None,
            }
        }
        // The entry exists but has expired. Take the write lock and evict it.
        self.entries.write().await.remove(key);
        None
    }

    pub async fn insert<S: Into<String>>(&self, key: S, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl).await;
    }

    pub async fn insert_with_ttl<S: Into<String>>(&self, key: S, value: V, ttl: Duration) {
        let entry = Entry { value, expires_at: Instant::now() + ttl };
        self.entries.write().await.insert(key.into(), entry);
    }

    pub async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Drop every expired entry. Callers run this opportunistically; nothing depends on it for correctness.
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.write().await.retain(|_, entry| entry.expires_at > now);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn insert_and_get() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("a", 1u32).await;
        assert_eq!(cache.get("a").await, Some(1));
        assert_eq!(cache.get("b").await, None);
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache.insert("a", 1u32).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("a").await, None);
        // and the expired entry was evicted by the read
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn remove_and_purge() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache.insert("a", 1u32).await;
        cache.insert_with_ttl("b", 2u32, Duration::from_secs(60)).await;
        cache.remove("a").await;
        assert_eq!(cache.get("a").await, None);
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.purge_expired().await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("b").await, Some(2));
    }

    #[tokio::test]
    async fn clones_share_the_store() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let other = cache.clone();
        cache.insert("a", 7u32).await;
        assert_eq!(other.get("a").await, Some(7));
        other.remove("a").await;
        assert_eq!(cache.get("a").await, None);
    }
}
