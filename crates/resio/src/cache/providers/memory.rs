//! # Memory Cache Provider
//!
//! In-process tier backed by Moka, sized by entry weight.

use bytes::Bytes;
use moka::future::Cache as MokaCache;
use tracing::{debug, warn};

use crate::cache::providers::CacheProvider;
use crate::cache::types::{CacheKey, CacheLookup, CacheMetadata, CacheResult};

#[derive(Clone)]
struct CacheEntry {
    data: Bytes,
    metadata: CacheMetadata,
}

/// In-memory cache tier. Fastest, least durable.
#[derive(Clone)]
pub struct MemoryCache {
    cache: MokaCache<CacheKey, CacheEntry>,
    max_size: u64,
}

impl MemoryCache {
    /// Create a memory tier holding at most `max_size_bytes` of entry data.
    pub fn new(max_size_bytes: u64) -> Self {
        assert!(max_size_bytes > 0, "memory cache size must be non-zero");

        let cache = MokaCache::builder()
            .weigher(|_k, v: &CacheEntry| v.data.len().try_into().unwrap_or(u32::MAX))
            .max_capacity(max_size_bytes)
            .build();

        debug!(max_size = max_size_bytes, "memory cache created");

        Self {
            cache,
            max_size: max_size_bytes,
        }
    }
}

#[async_trait::async_trait]
impl CacheProvider for MemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    fn available(&self) -> bool {
        true
    }

    async fn get(&self, key: &CacheKey) -> CacheLookup {
        let Some(entry) = self.cache.get(key).await else {
            return Ok(None);
        };

        if entry.metadata.is_expired() {
            debug!(key = ?key, "memory cache entry expired");
            self.cache.invalidate(key).await;
            return Ok(None);
        }

        Ok(Some((entry.data, entry.metadata)))
    }

    async fn put(&self, key: CacheKey, data: Bytes, metadata: CacheMetadata) -> CacheResult<()> {
        // A single entry larger than the whole tier would only thrash Moka's
        // admission policy.
        if metadata.size > self.max_size {
            warn!(
                key = ?key,
                size = metadata.size,
                max_size = self.max_size,
                "entry too large for memory cache, skipping"
            );
            return Ok(());
        }

        self.cache.insert(key, CacheEntry { data, metadata }).await;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.cache.invalidate_all();
        debug!("memory cache cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::CacheKind;
    use std::time::Duration;

    fn key(name: &str) -> CacheKey {
        CacheKey::new(CacheKind::Archive, name)
    }

    fn data(content: &str) -> Bytes {
        Bytes::from(content.to_string())
    }

    #[tokio::test]
    async fn put_then_get_hits() {
        let cache = MemoryCache::new(1024);
        let k = key("item1");
        let d = data("hello");
        let m = CacheMetadata::new(d.len() as u64);

        cache.put(k.clone(), d.clone(), m).await.unwrap();
        cache.cache.run_pending_tasks().await;

        let (got, meta) = cache.get(&k).await.unwrap().expect("hit");
        assert_eq!(got, d);
        assert_eq!(meta.size, d.len() as u64);
    }

    #[tokio::test]
    async fn missing_key_misses() {
        let cache = MemoryCache::new(1024);
        assert!(cache.get(&key("absent")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_removed() {
        let cache = MemoryCache::new(1024);
        let k = key("stale");
        let d = data("old");
        let mut m = CacheMetadata::new(d.len() as u64);
        m.cached_at = m.cached_at.saturating_sub(1000);
        m.expires_at = Some(m.cached_at + 1);

        cache.put(k.clone(), d, m).await.unwrap();
        cache.cache.run_pending_tasks().await;

        assert!(cache.get(&k).await.unwrap().is_none());
        cache.cache.run_pending_tasks().await;
        assert!(cache.get(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_entry_is_skipped() {
        let cache = MemoryCache::new(8);
        let k = key("big");
        let d = data("way more than eight bytes of content");
        let m = CacheMetadata::new(d.len() as u64);

        cache.put(k.clone(), d, m).await.unwrap();
        cache.cache.run_pending_tasks().await;
        assert!(cache.get(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let cache = MemoryCache::new(1024);
        let k1 = key("a");
        let k2 = key("b");
        let m = CacheMetadata::new(1).with_expiration(Duration::from_secs(60));

        cache.put(k1.clone(), data("1"), m.clone()).await.unwrap();
        cache.put(k2.clone(), data("2"), m).await.unwrap();
        cache.cache.run_pending_tasks().await;

        cache.remove(&k1).await.unwrap();
        cache.cache.run_pending_tasks().await;
        assert!(cache.get(&k1).await.unwrap().is_none());
        assert!(cache.get(&k2).await.unwrap().is_some());

        cache.clear().await.unwrap();
        cache.cache.run_pending_tasks().await;
        assert!(cache.get(&k2).await.unwrap().is_none());
    }
}
