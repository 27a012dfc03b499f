use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use moka::Expiry;
use moka::future::Cache;

use super::{CacheBackend, CacheResult};

#[derive(Clone)]
struct Entry {
    data: Bytes,
    ttl: Option<Duration>,
}

struct EntryExpiry {
    default_ttl: Option<Duration>,
}

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        value.ttl.or(self.default_ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl.or(self.default_ttl)
    }
}

/// In-process cache backed by moka.
///
/// Unbounded unless a limit is given. When `max_bytes` is set the cache is
/// weighed by payload size and `max_entries` is ignored. A bounded cache may
/// drop an entry at any time, including right after it was written.
pub struct MemoryCacheBackend {
    cache: Cache<String, Entry>,
}

impl MemoryCacheBackend {
    pub fn new(
        max_entries: Option<u64>,
        max_bytes: Option<u64>,
        default_ttl: Option<Duration>,
    ) -> Self {
        let builder = Cache::builder().expire_after(EntryExpiry { default_ttl });
        let cache = match (max_bytes, max_entries) {
            (Some(limit), _) => builder
                .weigher(|key: &String, value: &Entry| {
                    (key.len() + value.data.len()).try_into().unwrap_or(u32::MAX)
                })
                .max_capacity(limit)
                .build(),
            (None, Some(limit)) => builder.max_capacity(limit).build(),
            (None, None) => builder.build(),
        };
        Self { cache }
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        Ok(self.cache.get(key).await.map(|entry| entry.data))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> CacheResult<()> {
        self.cache
            .insert(key.to_string(), Entry { data: value, ttl })
            .await;
        Ok(())
    }

    async fn contains(&self, key: &str) -> CacheResult<bool> {
        Ok(self.cache.contains_key(key))
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = MemoryCacheBackend::new(Some(100), None, None);

        backend
            .set("k", Bytes::from_static(b"value"), None)
            .await
            .unwrap();
        assert_eq!(
            backend.get("k").await.unwrap(),
            Some(Bytes::from_static(b"value"))
        );
        assert!(backend.contains("k").await.unwrap());

        backend.delete("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(!backend.contains("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_per_entry_ttl_expires() {
        let backend = MemoryCacheBackend::new(Some(100), None, Some(Duration::from_secs(3600)));

        backend
            .set("short", Bytes::from_static(b"x"), Some(Duration::from_millis(50)))
            .await
            .unwrap();
        backend
            .set("long", Bytes::from_static(b"y"), None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(backend.get("short").await.unwrap(), None);
        assert_eq!(
            backend.get("long").await.unwrap(),
            Some(Bytes::from_static(b"y"))
        );
    }

    #[tokio::test]
    async fn test_unbounded_keeps_every_fresh_write() {
        let backend = MemoryCacheBackend::new(None, None, None);

        for i in 0..4 {
            backend
                .set(&format!("hot-{i}"), Bytes::from_static(b"hot"), None)
                .await
                .unwrap();
        }
        for _ in 0..20 {
            for i in 0..4 {
                backend.get(&format!("hot-{i}")).await.unwrap();
            }
        }

        for i in 0..20 {
            let key = format!("fresh-{i}");
            backend
                .set(&key, Bytes::from_static(b"audio"), None)
                .await
                .unwrap();
            assert!(
                backend.get(&key).await.unwrap().is_some(),
                "{key} dropped right after being stored"
            );
        }

        backend.cache.run_pending_tasks().await;
        assert_eq!(backend.entry_count(), 24);
    }

    #[tokio::test]
    async fn test_entry_limit_is_enforced_when_configured() {
        let backend = MemoryCacheBackend::new(Some(2), None, None);

        for i in 0..10 {
            backend
                .set(&format!("k{i}"), Bytes::from_static(b"x"), None)
                .await
                .unwrap();
        }
        backend.cache.run_pending_tasks().await;
        assert!(backend.entry_count() <= 2);
    }
}
