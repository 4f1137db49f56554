//! In-process cache with lazy expiry and a periodic sweep on write.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::application::ports::{CacheBackend, CacheError};

/// Minimum time between full expiry sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<String, Entry>,
    next_sweep: Option<Instant>,
}

impl Store {
    /// Drop every expired entry if the sweep interval has elapsed.
    fn sweep_if_due(&mut self, now: Instant) {
        if self.next_sweep.is_some_and(|due| now < due) {
            return;
        }
        self.entries.retain(|_, e| e.expires_at > now);
        self.next_sweep = Some(now + SWEEP_INTERVAL);
    }
}

/// Process-local key/value cache.
///
/// Expired entries are dropped when next read, and writes sweep the whole
/// map at most once per [`SWEEP_INTERVAL`] so keys that are never read
/// again do not accumulate. Batch writes are applied under one lock so
/// readers never observe half a batch.
#[derive(Debug, Default)]
pub struct MemoryCache {
    store: Mutex<Store>,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.store
            .lock()
            .entries
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    /// Whether no live entry exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) -> Option<String> {
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(Self::read(
            &mut self.store.lock().entries,
            key,
            Instant::now(),
        ))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        let now = Instant::now();
        let mut store = self.store.lock();
        Ok(keys
            .iter()
            .map(|key| Self::read(&mut store.entries, key, now))
            .collect())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut store = self.store.lock();
        store.sweep_if_due(now);
        store.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn set_many_ex(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let expires_at = now + ttl;
        let mut store = self.store.lock();
        store.sweep_if_due(now);
        for (key, value) in entries {
            store.entries.insert(
                key.clone(),
                Entry {
                    value: value.clone(),
                    expires_at,
                },
            );
        }
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get() {
        let cache = MemoryCache::new();
        cache.set_ex("k", "v", Duration::from_secs(10)).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(cache.get("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mget_preserves_order_and_gaps() {
        let cache = MemoryCache::new();
        cache
            .set_many_ex(
                &[
                    ("a".to_string(), "1".to_string()),
                    ("c".to_string(), "3".to_string()),
                ],
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        let values = cache
            .mget(&["c".to_string(), "b".to_string(), "a".to_string()])
            .await
            .unwrap();

        assert_eq!(
            values,
            vec![Some("3".to_string()), None, Some("1".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unread_expired_keys_are_swept_on_write() {
        let cache = MemoryCache::new();
        for i in 0..1_000 {
            cache
                .set_ex(&format!("bulk:USD,X{i}"), "[]", Duration::from_secs(120))
                .await
                .unwrap();
        }
        assert_eq!(cache.store.lock().entries.len(), 1_000);

        tokio::time::advance(Duration::from_secs(3_600)).await;
        cache.set_ex("all", "[]", Duration::from_secs(300)).await.unwrap();

        assert_eq!(cache.store.lock().entries.len(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_write_sweeps_expired_entries() {
        let cache = MemoryCache::new();
        cache.set_ex("by-code:OLD", "{}", Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(SWEEP_INTERVAL + Duration::from_secs(1)).await;
        cache
            .set_many_ex(
                &[("by-code:NEW".to_string(), "{}".to_string())],
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        let store = cache.store.lock();
        assert!(!store.entries.contains_key("by-code:OLD"));
        assert!(store.entries.contains_key("by-code:NEW"));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = MemoryCache::new();
        cache.set_ex("k", "v", Duration::from_secs(2)).await.unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty());
    }
}
