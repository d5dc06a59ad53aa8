use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tracing::debug;

/// Read-through cache interface for the listing operations.
/// Values are serialized JSON; keys are namespaced with `prefix:` segments
/// (`signals:trending:7d:20`, `narratives:active:50`).
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    /// Drop every key starting with the prefix (write invalidation on job completion).
    async fn invalidate_prefix(&self, prefix: &str);
}

/// Optional distributed tier (e.g. a hosted KV). Absent by default;
/// the in-process tier alone satisfies the contract.
#[async_trait]
pub trait KvTier: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str, ttl: Duration);
    async fn delete_prefix(&self, prefix: &str);
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Tier 1: bounded in-process TTL map with LRU eviction.
/// Writers are rare (cache fill) and hold the lock briefly.
pub struct MemoryTtlCache {
    entries: Mutex<LruCache<String, Entry>>,
}

impl MemoryTtlCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl Default for MemoryTtlCache {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Cache for MemoryTtlCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.put(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn invalidate_prefix(&self, prefix: &str) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        if !doomed.is_empty() {
            debug!(prefix, dropped = doomed.len(), "Cache prefix invalidated");
        }
    }
}

/// Two-tier composition: in-process map first, distributed KV second.
/// A tier-2 hit backfills tier 1.
pub struct TieredCache {
    memory: MemoryTtlCache,
    kv: Option<Box<dyn KvTier>>,
}

impl TieredCache {
    pub fn new(memory: MemoryTtlCache, kv: Option<Box<dyn KvTier>>) -> Self {
        Self { memory, kv }
    }

    pub fn memory_only(capacity: usize) -> Self {
        Self {
            memory: MemoryTtlCache::new(capacity),
            kv: None,
        }
    }
}

#[async_trait]
impl Cache for TieredCache {
    async fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.memory.get(key).await {
            return Some(value);
        }
        if let Some(kv) = &self.kv {
            if let Some(value) = kv.get(key).await {
                // Backfill tier 1 with a short TTL; tier 2 owns expiry.
                self.memory
                    .set(key, value.clone(), Duration::from_secs(30))
                    .await;
                return Some(value);
            }
        }
        None
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        if let Some(kv) = &self.kv {
            kv.set(key, &value, ttl).await;
        }
        self.memory.set(key, value, ttl).await;
    }

    async fn invalidate_prefix(&self, prefix: &str) {
        if let Some(kv) = &self.kv {
            kv.delete_prefix(prefix).await;
        }
        self.memory.invalidate_prefix(prefix).await;
    }
}

/// Always-miss cache for tests and cache-disabled runs.
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) {}

    async fn invalidate_prefix(&self, _prefix: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_what_was_set() {
        let cache = MemoryTtlCache::new(8);
        cache
            .set("signals:trending:7d:20", "[1,2]".into(), Duration::from_secs(60))
            .await;
        assert_eq!(
            cache.get("signals:trending:7d:20").await.as_deref(),
            Some("[1,2]")
        );
        assert!(cache.get("signals:trending:24h:20").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let cache = MemoryTtlCache::new(8);
        cache
            .set("k", "v".into(), Duration::from_millis(10))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn prefix_invalidation_drops_matching_keys_only() {
        let cache = MemoryTtlCache::new(8);
        let ttl = Duration::from_secs(60);
        cache.set("signals:trending:7d:20", "a".into(), ttl).await;
        cache.set("signals:trending:24h:10", "b".into(), ttl).await;
        cache.set("narratives:active:50", "c".into(), ttl).await;

        cache.invalidate_prefix("signals:").await;

        assert!(cache.get("signals:trending:7d:20").await.is_none());
        assert!(cache.get("signals:trending:24h:10").await.is_none());
        assert_eq!(cache.get("narratives:active:50").await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn lru_bound_evicts_oldest() {
        let cache = MemoryTtlCache::new(2);
        let ttl = Duration::from_secs(60);
        cache.set("a", "1".into(), ttl).await;
        cache.set("b", "2".into(), ttl).await;
        cache.set("c", "3".into(), ttl).await;
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn noop_cache_always_misses() {
        let cache = NoopCache;
        cache.set("k", "v".into(), Duration::from_secs(60)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn tiered_without_kv_behaves_like_memory() {
        let cache = TieredCache::memory_only(8);
        cache.set("k", "v".into(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        cache.invalidate_prefix("k").await;
        assert!(cache.get("k").await.is_none());
    }
}
