//! Redis-backed search cache.
//!
//! Values are the serialized result list; expiry is delegated to Redis
//! (`SET ... EX`). Any backend error maps to `Unavailable`, which the search
//! path treats as a miss on read and logs on write.

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};

use crate::cache::SearchCache;
use crate::errors::{PipelineError, Result};
use crate::model::SearchHit;

const SERVICE: &str = "cache";

#[derive(Clone)]
pub struct RedisCache {
    client: Client,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").finish()
    }
}

impl RedisCache {
    /// Create a cache against `url`, e.g. `redis://localhost:6379`.
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|err| PipelineError::unavailable(SERVICE, err))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| PipelineError::unavailable(SERVICE, err))
    }
}

#[async_trait]
impl SearchCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<SearchHit>>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|err| PipelineError::unavailable(SERVICE, err))?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, hits: &[SearchHit], ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(hits)?;
        let () = conn
            .set_ex(key, json, ttl.as_secs().max(1))
            .await
            .map_err(|err| PipelineError::unavailable(SERVICE, err))?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(|err| PipelineError::unavailable(SERVICE, err))?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let () = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|err| PipelineError::unavailable(SERVICE, err))?;
        Ok(())
    }
}
