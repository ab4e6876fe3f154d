//! Vector index seam: nearest-neighbor search over chunk embeddings.
//!
//! The index is the sole owner of [`VectorRecord`]s. Similarity is cosine,
//! and scoring is a total order: embeddings with non-finite components are
//! rejected at the boundary, so comparisons never see NaN.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::{PipelineError, Result};
use crate::model::{SearchHit, VectorRecord};

pub use memory::MemoryVectorIndex;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector for `record.vector_id`.
    ///
    /// `document_id` associates the vector with its document so
    /// [`VectorIndex::delete_by_document`] can scrub a failed batch.
    async fn upsert(&self, record: VectorRecord, document_id: Uuid) -> Result<()>;

    /// The `top_k` nearest neighbors of `embedding`, best first.
    ///
    /// Never returns more than `top_k` hits; fewer only when the index holds
    /// fewer vectors. Scores are non-increasing, ties broken by lower chunk
    /// id for determinism.
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchHit>>;

    /// Remove every vector belonging to `document_id`.
    async fn delete_by_document(&self, document_id: Uuid) -> Result<()>;

    /// Cheap liveness probe for health reporting.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Boundary check shared by upsert and query paths.
pub(crate) fn validate_embedding(expected_dim: usize, embedding: &[f32]) -> Result<()> {
    if embedding.len() != expected_dim {
        return Err(PipelineError::InvalidVector(format!(
            "dimension mismatch: expected {expected_dim}, got {}",
            embedding.len()
        )));
    }
    if let Some(component) = embedding.iter().find(|v| !v.is_finite()) {
        return Err(PipelineError::InvalidVector(format!(
            "non-finite component {component}"
        )));
    }
    Ok(())
}

/// Cosine similarity. Zero vectors score 0.0 so the result stays finite.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_wrong_dimension_and_nan() {
        assert!(validate_embedding(3, &[0.1, 0.2, 0.3]).is_ok());
        assert!(matches!(
            validate_embedding(3, &[0.1, 0.2]).unwrap_err(),
            PipelineError::InvalidVector(_)
        ));
        assert!(matches!(
            validate_embedding(3, &[0.1, f32::NAN, 0.3]).unwrap_err(),
            PipelineError::InvalidVector(_)
        ));
        assert!(matches!(
            validate_embedding(3, &[0.1, f32::INFINITY, 0.3]).unwrap_err(),
            PipelineError::InvalidVector(_)
        ));
    }

    #[test]
    fn cosine_is_one_for_parallel_and_zero_for_orthogonal() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
