//! Query path: embed, search the index, cache the result.
//!
//! The cache is read-through and strictly best-effort. A cache read error is
//! a miss, a cache write error is a warning; neither can fail a search. Cache
//! writes happen off the request path so a slow cache never adds latency.
//!
//! Staleness within the TTL is accepted: a document that becomes `Ready`
//! right after a query is cached will not appear for identical queries until
//! the entry expires.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHasher;
use tracing::{debug, instrument, warn};

use crate::cache::SearchCache;
use crate::errors::{PipelineError, Result};
use crate::index::VectorIndex;
use crate::model::SearchHit;
use crate::retry::bounded;
use crate::transform::Embedder;

/// Stable fingerprint of the raw query text and its `top_k`.
///
/// The text is hashed as given: whether two spellings of a query are "the
/// same" is the embedder's business, so the cache never folds case or
/// whitespace on its behalf.
pub fn query_fingerprint(query: &str, top_k: usize) -> String {
    let mut hasher = FxHasher::default();
    query.hash(&mut hasher);
    top_k.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

pub struct SearchService {
    cache: Arc<dyn SearchCache>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    cache_ttl: Duration,
    op_timeout: Duration,
}

impl SearchService {
    pub fn new(
        cache: Arc<dyn SearchCache>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        cache_ttl: Duration,
        op_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            index,
            embedder,
            cache_ttl,
            op_timeout,
        }
    }

    /// Top-`top_k` chunks most similar to `query`, best first.
    #[instrument(skip(self, query), err)]
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Err(PipelineError::Validation(
                "topK must be positive".to_string(),
            ));
        }
        if query.trim().is_empty() {
            return Err(PipelineError::Validation("query is empty".to_string()));
        }

        let key = format!("search:{}", query_fingerprint(query, top_k));
        match self.cache.get(&key).await {
            Ok(Some(hits)) => {
                debug!(%key, hits = hits.len(), "cache hit");
                return Ok(hits);
            }
            Ok(None) => {}
            Err(err) => warn!(%key, %err, "cache read failed, treating as miss"),
        }

        let embedding = bounded("embed query", self.op_timeout, self.embedder.embed(query)).await?;
        let hits = bounded(
            "index query",
            self.op_timeout,
            self.index.query(&embedding, top_k),
        )
        .await?;

        // Populate off the request path; losing the write only costs a
        // recompute on the next identical query.
        let cache = self.cache.clone();
        let ttl = self.cache_ttl;
        let cached = hits.clone();
        tokio::spawn(async move {
            if let Err(err) = cache.put(&key, &cached, ttl).await {
                warn!(%key, %err, "cache write failed");
            }
        });

        Ok(hits)
    }
}
