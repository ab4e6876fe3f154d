//! Processing workers: consume jobs, transform documents, settle deliveries.
//!
//! A worker is a crash-only loop. [`Worker::handle`] never propagates an
//! error past the delivery boundary; every outcome becomes exactly one
//! settlement. The claim compare-and-swap makes duplicate deliveries benign
//! (acked without work), and a failed transform leaves the document `Failed`
//! with zero chunks and zero index vectors before the job is redelivered or
//! dead-lettered.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::errors::{PipelineError, Result};
use crate::index::VectorIndex;
use crate::model::{Chunk, ProcessingJob, VectorRecord};
use crate::queue::{Delivery, JobQueue};
use crate::retry::bounded;
use crate::stores::{ClaimOutcome, MetadataStore, ObjectStore};
use crate::transform::{Chunker, Embedder, Extractor};

pub struct Worker {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    index: Arc<dyn VectorIndex>,
    extractor: Arc<dyn Extractor>,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn Embedder>,
    max_attempts: u32,
    op_timeout: Duration,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        index: Arc<dyn VectorIndex>,
        extractor: Arc<dyn Extractor>,
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn Embedder>,
        max_attempts: u32,
        op_timeout: Duration,
    ) -> Self {
        Self {
            metadata,
            objects,
            index,
            extractor,
            chunker,
            embedder,
            max_attempts,
            op_timeout,
        }
    }

    /// Process one delivery end to end and settle it.
    ///
    /// Infallible by contract: transform and store failures are recorded on
    /// the document and expressed through the settlement (nack or
    /// dead-letter), never returned.
    #[instrument(skip(self, delivery), fields(document_id = %delivery.job.document_id, attempt = delivery.job.attempt))]
    pub async fn handle(&self, delivery: Delivery) {
        let job = delivery.job.clone();

        let claim = bounded(
            "claim document",
            self.op_timeout,
            self.metadata.claim_for_processing(job.document_id),
        )
        .await;
        let doc_id = match claim {
            Ok(ClaimOutcome::Claimed(doc)) => doc.id,
            Ok(ClaimOutcome::Duplicate(status)) => {
                debug!(%status, "duplicate delivery, already handled");
                delivery.ack().await;
                return;
            }
            Ok(ClaimOutcome::Missing) => {
                warn!("job references an unknown document, dropping");
                delivery.ack().await;
                return;
            }
            Err(err) => {
                // Could not even reach the store; let the queue retry later.
                warn!(%err, "claim failed, returning job to the queue");
                delivery.nack().await;
                return;
            }
        };

        match self.process(&job).await {
            Ok(chunk_count) => {
                info!(chunk_count, "document ready");
                delivery.ack().await;
            }
            Err(err) => {
                self.fail_document(doc_id, &err.to_string()).await;
                if job.attempt >= self.max_attempts {
                    warn!(%err, attempt = job.attempt, "retry budget exhausted, dead-lettering");
                    delivery.dead_letter().await;
                } else {
                    warn!(%err, attempt = job.attempt, "processing failed, requeueing");
                    delivery.nack().await;
                }
            }
        }
    }

    /// Extract, chunk, embed, persist. Returns the number of chunks written.
    async fn process(&self, job: &ProcessingJob) -> Result<usize> {
        let bytes = bounded(
            "object fetch",
            self.op_timeout,
            self.objects.get(&job.blob_key),
        )
        .await?;
        let text = bounded("extract", self.op_timeout, self.extractor.extract(&bytes)).await?;
        let pieces = bounded("chunk", self.op_timeout, self.chunker.chunk(&text)).await?;
        if pieces.is_empty() {
            return Err(PipelineError::Processing(
                "chunker produced no chunks".to_string(),
            ));
        }

        let mut chunks = Vec::with_capacity(pieces.len());
        for (sequence_index, piece) in pieces.into_iter().enumerate() {
            let embedding = bounded("embed", self.op_timeout, self.embedder.embed(&piece)).await?;
            let chunk = Chunk {
                id: Uuid::new_v4(),
                document_id: job.document_id,
                sequence_index: sequence_index as u32,
                text: piece,
                vector_id: Uuid::new_v4(),
            };
            let record = VectorRecord {
                vector_id: chunk.vector_id,
                embedding,
                chunk_id: chunk.id,
            };
            bounded(
                "vector upsert",
                self.op_timeout,
                self.index.upsert(record, job.document_id),
            )
            .await?;
            chunks.push(chunk);
        }

        bounded(
            "complete document",
            self.op_timeout,
            self.metadata.complete_with_chunks(job.document_id, &chunks),
        )
        .await?;
        Ok(chunks.len())
    }

    /// Compensate a partial attempt: scrub index vectors, record the failure.
    ///
    /// A `Failed` document must hold zero chunks and zero vectors so a later
    /// retry starts from a clean slate.
    async fn fail_document(&self, document_id: Uuid, detail: &str) {
        if let Err(err) = self.index.delete_by_document(document_id).await {
            warn!(%document_id, %err, "could not scrub vectors for failed document");
        }
        if let Err(err) = self.metadata.mark_failed(document_id, detail).await {
            warn!(%document_id, %err, "could not record processing failure");
        }
    }
}

/// A set of worker tasks draining one queue, stopped via [`WorkerPool::shutdown`].
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` concurrent consumer loops over `queue`.
    pub fn spawn(worker: Arc<Worker>, queue: Arc<dyn JobQueue>, count: usize) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = (0..count)
            .map(|worker_id| {
                let worker = worker.clone();
                let queue = queue.clone();
                let mut shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    debug!(worker_id, "worker started");
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            delivery = queue.consume() => match delivery {
                                Ok(delivery) => worker.handle(delivery).await,
                                Err(err) => {
                                    warn!(worker_id, %err, "queue closed, worker exiting");
                                    break;
                                }
                            }
                        }
                    }
                    debug!(worker_id, "worker stopped");
                })
            })
            .collect();
        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Signal every worker to stop and wait for the loops to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        join_all(self.handles).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::errors::PipelineError;
    use crate::index::MemoryVectorIndex;
    use crate::model::{Document, DocumentStatus};
    use crate::queue::MemoryQueue;
    use crate::stores::{MemoryMetadataStore, MemoryObjectStore};
    use crate::transform::{HashEmbedder, Utf8Extractor, WindowChunker};

    const DIM: usize = 32;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(PipelineError::Processing("embedder offline".to_string()))
        }

        fn dimension(&self) -> usize {
            DIM
        }
    }

    struct Fixture {
        metadata: Arc<MemoryMetadataStore>,
        objects: Arc<MemoryObjectStore>,
        index: Arc<MemoryVectorIndex>,
        queue: Arc<MemoryQueue>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                metadata: Arc::new(MemoryMetadataStore::new()),
                objects: Arc::new(MemoryObjectStore::new()),
                index: Arc::new(MemoryVectorIndex::new(DIM)),
                queue: Arc::new(MemoryQueue::new(Duration::from_secs(30))),
            }
        }

        fn worker(&self, embedder: Arc<dyn Embedder>) -> Worker {
            Worker::new(
                self.metadata.clone(),
                self.objects.clone(),
                self.index.clone(),
                Arc::new(Utf8Extractor),
                Arc::new(WindowChunker::default()),
                embedder,
                3,
                Duration::from_secs(1),
            )
        }

        async fn seed(&self, body: &[u8]) -> Document {
            let doc = Document::new("seed.txt");
            self.objects.put(&doc.blob_key, body).await.unwrap();
            self.metadata.insert_document(&doc).await.unwrap();
            self.queue
                .enqueue(ProcessingJob::new(doc.id, doc.blob_key.clone()))
                .await
                .unwrap();
            doc
        }
    }

    #[tokio::test]
    async fn successful_processing_marks_ready_with_chunks_and_vectors() {
        let fx = Fixture::new();
        let worker = fx.worker(Arc::new(HashEmbedder::new(DIM)));
        let doc = fx.seed(b"climate risk disclosures for the fiscal year").await;

        worker.handle(fx.queue.consume().await.unwrap()).await;

        let fetched = fx.metadata.fetch_document(doc.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, DocumentStatus::Ready);
        assert!(fetched.error_detail.is_none());
        let chunks = fx.metadata.chunks_for_document(doc.id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(fx.index.len(), 1);
        assert_eq!(fx.queue.pending(), 0);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_acked_without_reprocessing() {
        let fx = Fixture::new();
        let worker = fx.worker(Arc::new(HashEmbedder::new(DIM)));
        let doc = fx.seed(b"some uploaded text").await;

        // Second delivery for the same document, as redelivery would produce.
        fx.queue
            .enqueue(ProcessingJob::new(doc.id, doc.blob_key.clone()).retry())
            .await
            .unwrap();

        worker.handle(fx.queue.consume().await.unwrap()).await;
        worker.handle(fx.queue.consume().await.unwrap()).await;

        let chunks = fx.metadata.chunks_for_document(doc.id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(fx.index.len(), 1);
        assert_eq!(fx.queue.pending(), 0);
    }

    #[tokio::test]
    async fn failure_marks_failed_with_detail_and_requeues() {
        let fx = Fixture::new();
        let worker = fx.worker(Arc::new(FailingEmbedder));
        let doc = fx.seed(b"text that will not embed").await;

        worker.handle(fx.queue.consume().await.unwrap()).await;

        let fetched = fx.metadata.fetch_document(doc.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, DocumentStatus::Failed);
        assert!(fetched.error_detail.as_deref().unwrap().contains("embedder offline"));
        assert!(fx.metadata.chunks_for_document(doc.id).await.unwrap().is_empty());
        assert_eq!(fx.index.len(), 0);

        // Attempt 0 failed below the budget, so the job comes back.
        let redelivered = fx.queue.consume().await.unwrap();
        assert_eq!(redelivered.job.attempt, 1);
        redelivered.ack().await;
    }

    #[tokio::test]
    async fn exhausted_retry_budget_dead_letters_exactly_once() {
        let fx = Fixture::new();
        let worker = fx.worker(Arc::new(FailingEmbedder));
        let doc = fx.seed(b"never embeds").await;

        // Initial try plus three redeliveries, then the dead-letter sink.
        for _ in 0..=3 {
            worker.handle(fx.queue.consume().await.unwrap()).await;
        }

        assert_eq!(fx.queue.pending(), 0);
        let dead = fx.queue.drain_dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].document_id, doc.id);
        assert_eq!(dead[0].attempt, 3);

        let fetched = fx.metadata.fetch_document(doc.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, DocumentStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_document_is_dropped_without_effect() {
        let fx = Fixture::new();
        let worker = fx.worker(Arc::new(HashEmbedder::new(DIM)));
        fx.queue
            .enqueue(ProcessingJob::new(Uuid::new_v4(), "documents/ghost/original"))
            .await
            .unwrap();

        worker.handle(fx.queue.consume().await.unwrap()).await;
        assert_eq!(fx.queue.pending(), 0);
        assert!(fx.queue.drain_dead_letters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn worker_pool_drains_the_queue_concurrently() {
        let fx = Fixture::new();
        let worker = Arc::new(fx.worker(Arc::new(HashEmbedder::new(DIM))));
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(fx.seed(format!("document number {i}").as_bytes()).await.id);
        }

        let pool = WorkerPool::spawn(worker, fx.queue.clone(), 2);
        for _ in 0..50 {
            if fx.index.len() == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        pool.shutdown().await;

        for id in ids {
            let doc = fx.metadata.fetch_document(id).await.unwrap().unwrap();
            assert_eq!(doc.status, DocumentStatus::Ready);
        }
    }
}
