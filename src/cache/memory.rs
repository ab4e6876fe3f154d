//! In-memory TTL cache.
//!
//! Expiry uses `tokio::time::Instant` so tests can drive the clock with
//! paused time. Expired entries are dropped lazily on read.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::cache::SearchCache;
use crate::errors::Result;
use crate::model::SearchHit;

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Vec<SearchHit>, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SearchCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<SearchHit>>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((hits, expires_at)) if *expires_at > Instant::now() => Ok(Some(hits.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, hits: &[SearchHit], ttl: Duration) -> Result<()> {
        self.entries
            .lock()
            .insert(key.to_string(), (hits.to_vec(), Instant::now() + ttl));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn hits() -> Vec<SearchHit> {
        vec![SearchHit {
            chunk_id: Uuid::new_v4(),
            score: 0.9,
        }]
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = MemoryCache::new();
        cache
            .put("search:abc", &hits(), Duration::from_secs(300))
            .await
            .unwrap();
        assert!(cache.get("search:abc").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(cache.get("search:abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overwrite_is_idempotent_and_clear_empties() {
        let cache = MemoryCache::new();
        let first = hits();
        cache
            .put("search:k", &first, Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .put("search:k", &first, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("search:k").await.unwrap().unwrap(), first);

        cache.clear().await.unwrap();
        assert!(cache.get("search:k").await.unwrap().is_none());
    }
}
