//! Read-through cache in front of search.
//!
//! The cache is a derived, disposable projection of the vector index: never
//! authoritative, always reconstructible, safely clearable at any time with
//! only a latency cost. Entries expire after a TTL and are trusted without
//! revalidation until then.

pub mod memory;
#[cfg(feature = "cache-redis")]
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;
use crate::model::SearchHit;

pub use memory::MemoryCache;
#[cfg(feature = "cache-redis")]
pub use redis::RedisCache;

#[async_trait]
pub trait SearchCache: Send + Sync {
    /// Cached results for `key`, or `None` on miss or expiry.
    async fn get(&self, key: &str) -> Result<Option<Vec<SearchHit>>>;

    /// Store `hits` under `key` for `ttl`. Overwrites are idempotent.
    async fn put(&self, key: &str, hits: &[SearchHit], ttl: Duration) -> Result<()>;

    /// Drop every entry. Correctness is unaffected; only latency is lost.
    async fn clear(&self) -> Result<()>;

    /// Cheap liveness probe for health reporting.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
