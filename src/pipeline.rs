//! Wires the stores, transforms, and services into one runnable pipeline.
//!
//! [`PipelineBuilder`] defaults every seam to its in-memory implementation
//! (or the filesystem object store when a root is configured), so a complete
//! pipeline runs inside a single test with no external services. Swap in
//! Postgres, Redis, or a real embedder through the `with_*` overrides.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{MemoryCache, SearchCache};
use crate::config::PipelineConfig;
use crate::index::{MemoryVectorIndex, VectorIndex};
use crate::ingest::{IngestionGateway, SweeperHandle};
use crate::queue::{JobQueue, MemoryQueue};
use crate::search::SearchService;
use crate::stores::{FsObjectStore, MemoryMetadataStore, MemoryObjectStore, MetadataStore, ObjectStore};
use crate::transform::{Chunker, Embedder, Extractor, HashEmbedder, Utf8Extractor, WindowChunker};
use crate::worker::{Worker, WorkerPool};

pub struct Pipeline {
    config: PipelineConfig,
    pub metadata: Arc<dyn MetadataStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub index: Arc<dyn VectorIndex>,
    pub cache: Arc<dyn SearchCache>,
    pub queue: Arc<dyn JobQueue>,
    gateway: Arc<IngestionGateway>,
    search: Arc<SearchService>,
    worker: Arc<Worker>,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<IngestionGateway> {
        &self.gateway
    }

    pub fn search(&self) -> &Arc<SearchService> {
        &self.search
    }

    /// Start the configured number of queue consumers.
    pub fn start_workers(&self) -> WorkerPool {
        WorkerPool::spawn(
            self.worker.clone(),
            self.queue.clone(),
            self.config.worker_count,
        )
    }

    /// Start the stale-`Pending` reconciliation sweep.
    pub fn start_sweeper(&self, interval: Duration) -> SweeperHandle {
        self.gateway.spawn_sweeper(interval, self.config.sweep_grace)
    }

    /// Ping every dependency, reporting each one individually.
    pub async fn health(&self) -> HealthReport {
        HealthReport {
            metadata: self.metadata.ping().await.is_ok(),
            objects: self.objects.ping().await.is_ok(),
            index: self.index.ping().await.is_ok(),
            cache: self.cache.ping().await.is_ok(),
            queue: self.queue.ping().await.is_ok(),
        }
    }
}

/// Per-dependency liveness, as reported by the status endpoint.
#[derive(Clone, Copy, Debug)]
pub struct HealthReport {
    pub metadata: bool,
    pub objects: bool,
    pub index: bool,
    pub cache: bool,
    pub queue: bool,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.metadata && self.objects && self.index && self.cache && self.queue
    }
}

pub struct PipelineBuilder {
    config: PipelineConfig,
    metadata: Option<Arc<dyn MetadataStore>>,
    objects: Option<Arc<dyn ObjectStore>>,
    index: Option<Arc<dyn VectorIndex>>,
    cache: Option<Arc<dyn SearchCache>>,
    queue: Option<Arc<dyn JobQueue>>,
    extractor: Option<Arc<dyn Extractor>>,
    chunker: Option<Arc<dyn Chunker>>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            metadata: None,
            objects: None,
            index: None,
            cache: None,
            queue: None,
            extractor: None,
            chunker: None,
            embedder: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn with_objects(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    #[must_use]
    pub fn with_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn SearchCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    #[must_use]
    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn build(self) -> Pipeline {
        let config = self.config;

        let embedder = self
            .embedder
            .unwrap_or_else(|| Arc::new(HashEmbedder::new(config.embedding_dim)));
        let extractor = self.extractor.unwrap_or_else(|| Arc::new(Utf8Extractor));
        let chunker = self
            .chunker
            .unwrap_or_else(|| Arc::new(WindowChunker::default()));

        let metadata = self
            .metadata
            .unwrap_or_else(|| Arc::new(MemoryMetadataStore::new()));
        let objects = self.objects.unwrap_or_else(|| match &config.object_store_root {
            Some(root) => Arc::new(FsObjectStore::new(root.clone())) as Arc<dyn ObjectStore>,
            None => Arc::new(MemoryObjectStore::new()),
        });
        // The index must agree with whatever embedder is in play.
        let index = self
            .index
            .unwrap_or_else(|| Arc::new(MemoryVectorIndex::new(embedder.dimension())));
        let cache = self.cache.unwrap_or_else(|| Arc::new(MemoryCache::new()));
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(MemoryQueue::new(config.visibility_timeout)));

        let gateway = Arc::new(IngestionGateway::new(
            objects.clone(),
            metadata.clone(),
            queue.clone(),
            config.max_upload_bytes,
            config.op_timeout,
        ));
        let search = Arc::new(SearchService::new(
            cache.clone(),
            index.clone(),
            embedder.clone(),
            config.cache_ttl,
            config.op_timeout,
        ));
        let worker = Arc::new(Worker::new(
            metadata.clone(),
            objects.clone(),
            index.clone(),
            extractor,
            chunker,
            embedder,
            config.max_attempts,
            config.op_timeout,
        ));

        Pipeline {
            config,
            metadata,
            objects,
            index,
            cache,
            queue,
            gateway,
            search,
            worker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_build_is_healthy() {
        let pipeline = Pipeline::builder(PipelineConfig::default()).build();
        assert!(pipeline.health().await.healthy());
    }

    #[tokio::test]
    async fn fs_object_store_is_selected_when_a_root_is_configured() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            object_store_root: Some(dir.path().to_path_buf()),
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::builder(config).build();
        pipeline.objects.put("documents/x/original", b"hi").await.unwrap();
        assert_eq!(pipeline.objects.get("documents/x/original").await.unwrap(), b"hi");
    }
}
