//! Relational records for documents and their processing status.
//!
//! The status column doubles as the pipeline's mutual-exclusion point:
//! [`MetadataStore::claim_for_processing`] must be a single atomic
//! conditional update (compare-and-swap on status), because workers are
//! independent processes with no shared memory. A plain read-then-write is
//! a race.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::errors::Result;
use crate::model::{Chunk, Document, DocumentStatus};

/// Result of the `Pending|Failed -> Processing` compare-and-swap.
#[derive(Clone, Debug, PartialEq)]
pub enum ClaimOutcome {
    /// This worker won the claim and owns the document until completion.
    Claimed(Document),
    /// Another delivery got there first (`Ready` or `Processing`); treat the
    /// delivery as a benign duplicate and acknowledge it.
    Duplicate(DocumentStatus),
    /// No such document.
    Missing,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert_document(&self, doc: &Document) -> Result<()>;

    async fn fetch_document(&self, id: Uuid) -> Result<Option<Document>>;

    /// Most recently created documents, newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Document>>;

    /// Atomically transition `Pending` or `Failed` to `Processing`.
    ///
    /// `Failed` is claimable so a redelivered job can retry; `Ready` and
    /// `Processing` report [`ClaimOutcome::Duplicate`].
    async fn claim_for_processing(&self, id: Uuid) -> Result<ClaimOutcome>;

    /// Persist the chunk batch and mark the document `Ready` in one logical
    /// transaction. Replaces any chunks from an earlier attempt, so a
    /// duplicate pass can never double-write.
    async fn complete_with_chunks(&self, id: Uuid, chunks: &[Chunk]) -> Result<()>;

    /// Mark the document `Failed` with a diagnostic. A failed document keeps
    /// zero chunks.
    async fn mark_failed(&self, id: Uuid, detail: &str) -> Result<()>;

    async fn chunks_for_document(&self, id: Uuid) -> Result<Vec<Chunk>>;

    /// Documents still `Pending` with `updated_at` older than the cutoff.
    /// Input to the reconciliation sweep.
    async fn stale_pending(&self, older_than: DateTime<Utc>) -> Result<Vec<Document>>;

    /// Cheap liveness probe for health reporting.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Inner {
    documents: HashMap<Uuid, Document>,
    chunks: HashMap<Uuid, Vec<Chunk>>,
}

/// In-memory metadata store. A single lock makes every operation atomic,
/// which satisfies the compare-and-swap contract trivially.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    inner: Mutex<Inner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        self.inner.lock().documents.insert(doc.id, doc.clone());
        Ok(())
    }

    async fn fetch_document(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.inner.lock().documents.get(&id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Document>> {
        let inner = self.inner.lock();
        let mut docs: Vec<Document> = inner.documents.values().cloned().collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        docs.truncate(limit);
        Ok(docs)
    }

    async fn claim_for_processing(&self, id: Uuid) -> Result<ClaimOutcome> {
        let mut inner = self.inner.lock();
        let Some(doc) = inner.documents.get_mut(&id) else {
            return Ok(ClaimOutcome::Missing);
        };
        match doc.status {
            DocumentStatus::Pending | DocumentStatus::Failed => {
                doc.status = DocumentStatus::Processing;
                doc.updated_at = Utc::now();
                Ok(ClaimOutcome::Claimed(doc.clone()))
            }
            status => Ok(ClaimOutcome::Duplicate(status)),
        }
    }

    async fn complete_with_chunks(&self, id: Uuid, chunks: &[Chunk]) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(doc) = inner.documents.get_mut(&id) {
            doc.status = DocumentStatus::Ready;
            doc.error_detail = None;
            doc.updated_at = Utc::now();
        }
        inner.chunks.insert(id, chunks.to_vec());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, detail: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(doc) = inner.documents.get_mut(&id) {
            doc.status = DocumentStatus::Failed;
            doc.error_detail = Some(detail.to_string());
            doc.updated_at = Utc::now();
        }
        inner.chunks.remove(&id);
        Ok(())
    }

    async fn chunks_for_document(&self, id: Uuid) -> Result<Vec<Chunk>> {
        Ok(self.inner.lock().chunks.get(&id).cloned().unwrap_or_default())
    }

    async fn stale_pending(&self, older_than: DateTime<Utc>) -> Result<Vec<Document>> {
        let inner = self.inner.lock();
        Ok(inner
            .documents
            .values()
            .filter(|doc| doc.status == DocumentStatus::Pending && doc.updated_at < older_than)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn sample_doc() -> Document {
        Document::new("notes.txt")
    }

    #[tokio::test]
    async fn claim_moves_pending_to_processing_exactly_once() {
        let store = MemoryMetadataStore::new();
        let doc = sample_doc();
        store.insert_document(&doc).await.unwrap();

        let first = store.claim_for_processing(doc.id).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed(_)));

        let second = store.claim_for_processing(doc.id).await.unwrap();
        assert_eq!(
            second,
            ClaimOutcome::Duplicate(DocumentStatus::Processing)
        );
    }

    #[tokio::test]
    async fn failed_documents_are_reclaimable_for_retry() {
        let store = MemoryMetadataStore::new();
        let doc = sample_doc();
        store.insert_document(&doc).await.unwrap();
        store.claim_for_processing(doc.id).await.unwrap();
        store.mark_failed(doc.id, "embed blew up").await.unwrap();

        let claim = store.claim_for_processing(doc.id).await.unwrap();
        assert!(matches!(claim, ClaimOutcome::Claimed(_)));
    }

    #[tokio::test]
    async fn mark_failed_clears_chunks_and_records_detail() {
        let store = MemoryMetadataStore::new();
        let doc = sample_doc();
        store.insert_document(&doc).await.unwrap();
        let chunk = Chunk {
            id: Uuid::new_v4(),
            document_id: doc.id,
            sequence_index: 0,
            text: "hello".into(),
            vector_id: Uuid::new_v4(),
        };
        store.complete_with_chunks(doc.id, &[chunk]).await.unwrap();
        assert_eq!(store.chunks_for_document(doc.id).await.unwrap().len(), 1);

        store.mark_failed(doc.id, "late failure").await.unwrap();
        let fetched = store.fetch_document(doc.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, DocumentStatus::Failed);
        assert_eq!(fetched.error_detail.as_deref(), Some("late failure"));
        assert!(store.chunks_for_document(doc.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_pending_filters_on_age_and_status() {
        let store = MemoryMetadataStore::new();
        let mut old = sample_doc();
        old.updated_at = Utc::now() - ChronoDuration::minutes(30);
        let fresh = sample_doc();
        store.insert_document(&old).await.unwrap();
        store.insert_document(&fresh).await.unwrap();

        let cutoff = Utc::now() - ChronoDuration::minutes(5);
        let stale = store.stale_pending(cutoff).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);
    }

    #[tokio::test]
    async fn list_recent_orders_newest_first() {
        let store = MemoryMetadataStore::new();
        let mut older = sample_doc();
        older.created_at = Utc::now() - ChronoDuration::hours(1);
        let newer = sample_doc();
        store.insert_document(&older).await.unwrap();
        store.insert_document(&newer).await.unwrap();

        let listed = store.list_recent(10).await.unwrap();
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }
}
