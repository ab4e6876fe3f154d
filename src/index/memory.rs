//! Brute-force in-memory vector index.
//!
//! Exact cosine scan over all stored vectors. Plenty for tests and modest
//! corpora; the [`VectorIndex`] trait is the seam for an external index.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::errors::Result;
use crate::index::{VectorIndex, cosine_similarity, validate_embedding};
use crate::model::{SearchHit, VectorRecord};

#[derive(Clone, Debug)]
struct StoredVector {
    embedding: Vec<f32>,
    chunk_id: Uuid,
    document_id: Uuid,
}

#[derive(Debug)]
pub struct MemoryVectorIndex {
    dim: usize,
    entries: RwLock<HashMap<Uuid, StoredVector>>,
}

impl MemoryVectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored vectors. Used by tests asserting batch atomicity.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, record: VectorRecord, document_id: Uuid) -> Result<()> {
        validate_embedding(self.dim, &record.embedding)?;
        self.entries.write().insert(
            record.vector_id,
            StoredVector {
                embedding: record.embedding,
                chunk_id: record.chunk_id,
                document_id,
            },
        );
        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        validate_embedding(self.dim, embedding)?;
        let entries = self.entries.read();
        let mut hits: Vec<SearchHit> = entries
            .values()
            .map(|stored| SearchHit {
                chunk_id: stored.chunk_id,
                score: cosine_similarity(embedding, &stored.embedding),
            })
            .collect();
        // Scores are finite by construction, so total_cmp gives a total
        // order; ties fall back to chunk id for determinism.
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_by_document(&self, document_id: Uuid) -> Result<()> {
        self.entries
            .write()
            .retain(|_, stored| stored.document_id != document_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PipelineError;

    fn record(embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            vector_id: Uuid::new_v4(),
            embedding,
            chunk_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn query_ranks_by_similarity_and_caps_at_top_k() {
        let index = MemoryVectorIndex::new(2);
        let doc = Uuid::new_v4();
        let near = record(vec![1.0, 0.0]);
        let far = record(vec![0.0, 1.0]);
        let mid = record(vec![1.0, 1.0]);
        let near_chunk = near.chunk_id;
        for rec in [near, far, mid] {
            index.upsert(rec, doc).await.unwrap();
        }

        let hits = index.query(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, near_chunk);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn query_returns_fewer_when_index_is_small() {
        let index = MemoryVectorIndex::new(2);
        index
            .upsert(record(vec![0.5, 0.5]), Uuid::new_v4())
            .await
            .unwrap();
        let hits = index.query(&[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn equal_scores_break_ties_by_lower_chunk_id() {
        let index = MemoryVectorIndex::new(2);
        let doc = Uuid::new_v4();
        let mut a = record(vec![1.0, 0.0]);
        let mut b = record(vec![1.0, 0.0]);
        a.chunk_id = Uuid::from_u128(1);
        b.chunk_id = Uuid::from_u128(2);
        index.upsert(b, doc).await.unwrap();
        index.upsert(a, doc).await.unwrap();

        let hits = index.query(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits[0].chunk_id, Uuid::from_u128(1));
        assert_eq!(hits[1].chunk_id, Uuid::from_u128(2));
    }

    #[tokio::test]
    async fn upsert_rejects_invalid_vectors_at_the_boundary() {
        let index = MemoryVectorIndex::new(3);
        let err = index
            .upsert(record(vec![1.0, f32::NAN, 0.0]), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidVector(_)));
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn delete_by_document_scrubs_only_that_document() {
        let index = MemoryVectorIndex::new(2);
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        index.upsert(record(vec![1.0, 0.0]), doc_a).await.unwrap();
        index.upsert(record(vec![0.0, 1.0]), doc_a).await.unwrap();
        index.upsert(record(vec![1.0, 1.0]), doc_b).await.unwrap();

        index.delete_by_document(doc_a).await.unwrap();
        assert_eq!(index.len(), 1);
    }
}
