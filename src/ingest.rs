//! Ingestion gateway: accepts uploads and hands them to the pipeline.
//!
//! `submit` performs three side effects in a fixed order (blob write,
//! metadata insert, job enqueue) with compensating cleanup so no store is
//! left referencing state the others never saw: a failed metadata insert
//! deletes the blob, and a failed enqueue marks the document `Failed`
//! rather than leaving it silently `Pending` forever.
//!
//! A `Pending` document with no job can still arise (crash between insert
//! and enqueue, or a lost message); [`IngestionGateway::reconcile_stale_pending`]
//! is the periodic sweep that re-enqueues them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::{PipelineError, Result};
use crate::model::{Document, ProcessingJob};
use crate::queue::JobQueue;
use crate::retry::{BackoffPolicy, bounded, with_backoff};
use crate::stores::{MetadataStore, ObjectStore};

pub struct IngestionGateway {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    queue: Arc<dyn JobQueue>,
    max_upload_bytes: usize,
    op_timeout: Duration,
    backoff: BackoffPolicy,
}

impl IngestionGateway {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        queue: Arc<dyn JobQueue>,
        max_upload_bytes: usize,
        op_timeout: Duration,
    ) -> Self {
        Self {
            objects,
            metadata,
            queue,
            max_upload_bytes,
            op_timeout,
            backoff: BackoffPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Accept an upload and return the new document id.
    ///
    /// On success the document is `Pending` with its blob persisted and a
    /// processing job on the queue. Transient store failures are retried
    /// with backoff before surfacing as `Unavailable`.
    #[instrument(skip(self, bytes), fields(size = bytes.len()), err)]
    pub async fn submit(&self, bytes: &[u8], original_name: &str) -> Result<Uuid> {
        if bytes.is_empty() {
            return Err(PipelineError::Validation("empty upload".to_string()));
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(PipelineError::TooLarge {
                size: bytes.len(),
                limit: self.max_upload_bytes,
            });
        }

        let doc = Document::new(original_name);

        with_backoff(&self.backoff, || {
            bounded(
                "object store put",
                self.op_timeout,
                self.objects.put(&doc.blob_key, bytes),
            )
        })
        .await?;

        let inserted = with_backoff(&self.backoff, || {
            bounded(
                "metadata insert",
                self.op_timeout,
                self.metadata.insert_document(&doc),
            )
        })
        .await;
        if let Err(err) = inserted {
            // No orphan blob without a metadata record.
            if let Err(cleanup) = self.objects.delete(&doc.blob_key).await {
                warn!(document_id = %doc.id, %cleanup, "blob cleanup after failed insert also failed");
            }
            return Err(err);
        }

        let job = ProcessingJob::new(doc.id, doc.blob_key.clone());
        if let Err(err) = self.queue.enqueue(job).await {
            // Leave a visible failure, never a silent Pending with no job.
            warn!(document_id = %doc.id, %err, "enqueue failed, marking document failed");
            if let Err(mark) = self.metadata.mark_failed(doc.id, "enqueue failed").await {
                warn!(document_id = %doc.id, %mark, "could not record enqueue failure");
            }
            return Err(err);
        }

        info!(document_id = %doc.id, name = original_name, "document accepted");
        Ok(doc.id)
    }

    /// Re-enqueue documents stuck in `Pending` longer than `grace`.
    ///
    /// Returns the number of documents re-enqueued.
    #[instrument(skip(self), err)]
    pub async fn reconcile_stale_pending(&self, grace: Duration) -> Result<usize> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(grace)
                .map_err(|err| PipelineError::Validation(format!("grace out of range: {err}")))?;
        let stale = self.metadata.stale_pending(cutoff).await?;
        let mut requeued = 0;
        for doc in stale {
            let job = ProcessingJob::new(doc.id, doc.blob_key.clone());
            match self.queue.enqueue(job).await {
                Ok(()) => {
                    info!(document_id = %doc.id, "re-enqueued stale pending document");
                    requeued += 1;
                }
                Err(err) => warn!(document_id = %doc.id, %err, "re-enqueue failed"),
            }
        }
        Ok(requeued)
    }

    /// Run the reconciliation sweep on a fixed interval until stopped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, grace: Duration) -> SweeperHandle {
        let gateway = self.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(err) = gateway.reconcile_stale_pending(grace).await {
                            warn!(%err, "stale-pending sweep failed");
                        }
                    }
                }
            }
        });
        SweeperHandle {
            shutdown_tx,
            handle,
        }
    }
}

/// Shutdown handle for the background sweep loop.
pub struct SweeperHandle {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}
