//! Pluggable content transforms: extraction, chunking, embedding.
//!
//! The pipeline's control flow never depends on a specific algorithm; it
//! only sees these three traits. The implementations shipped here are
//! deterministic stand-ins with the same contract a real extractor or
//! embedding model would honor, which keeps the coordination logic fully
//! testable without model weights or network calls.

use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use rustc_hash::FxHasher;

use crate::errors::{PipelineError, Result};

/// Turns raw uploaded bytes into text.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, bytes: &[u8]) -> Result<String>;
}

/// Splits extracted text into an ordered sequence of chunk texts.
#[async_trait]
pub trait Chunker: Send + Sync {
    async fn chunk(&self, text: &str) -> Result<Vec<String>>;
}

/// Computes a fixed-dimension embedding for a chunk or query.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimension of every vector this embedder produces.
    fn dimension(&self) -> usize;
}

/// Lossy UTF-8 extraction; invalid sequences are replaced, not fatal.
#[derive(Clone, Copy, Debug, Default)]
pub struct Utf8Extractor;

#[async_trait]
impl Extractor for Utf8Extractor {
    async fn extract(&self, bytes: &[u8]) -> Result<String> {
        let text = String::from_utf8_lossy(bytes).into_owned();
        if text.trim().is_empty() {
            return Err(PipelineError::Processing(
                "extracted text is empty".to_string(),
            ));
        }
        Ok(text)
    }
}

/// Greedy word-window chunker: accumulates whitespace-separated words until
/// the character budget is hit. Non-empty input always yields at least one
/// chunk.
#[derive(Clone, Copy, Debug)]
pub struct WindowChunker {
    pub max_chars: usize,
}

impl Default for WindowChunker {
    fn default() -> Self {
        Self { max_chars: 800 }
    }
}

#[async_trait]
impl Chunker for WindowChunker {
    async fn chunk(&self, text: &str) -> Result<Vec<String>> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        for word in text.split_whitespace() {
            if !current.is_empty() && current.len() + 1 + word.len() > self.max_chars {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        Ok(chunks)
    }
}

/// Deterministic bag-of-words hashing embedder.
///
/// Each lowercased alphanumeric token is hashed into one of `dim` buckets and
/// the resulting counts are L2-normalized. Identical text always embeds to
/// the identical vector, and texts sharing tokens land near each other under
/// cosine similarity, which is exactly what the pipeline tests need.
#[derive(Clone, Copy, Debug)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut buckets = vec![0.0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = FxHasher::default();
            token.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dim as u64) as usize;
            buckets[bucket] += 1.0;
        }
        let norm = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut buckets {
                *value /= norm;
            }
        }
        Ok(buckets)
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn utf8_extractor_is_lossy_not_fatal() {
        let text = Utf8Extractor.extract(b"hello \xff world").await.unwrap();
        assert!(text.contains("hello"));
        assert!(text.contains("world"));
    }

    #[tokio::test]
    async fn utf8_extractor_rejects_blank_content() {
        let err = Utf8Extractor.extract(b"   \n\t ").await.unwrap_err();
        assert!(matches!(err, PipelineError::Processing(_)));
    }

    #[tokio::test]
    async fn window_chunker_respects_budget_and_order() {
        let chunker = WindowChunker { max_chars: 10 };
        let chunks = chunker.chunk("alpha beta gamma delta").await.unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(chunks.join(" "), "alpha beta gamma delta");
        for chunk in &chunks {
            assert!(chunk.len() <= 11, "chunk too long: {chunk:?}");
        }
    }

    #[tokio::test]
    async fn window_chunker_yields_one_chunk_for_short_text() {
        let chunks = WindowChunker::default().chunk("tiny note").await.unwrap();
        assert_eq!(chunks, vec!["tiny note".to_string()]);
    }

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("the quick brown fox").await.unwrap();
        let b = embedder.embed("the quick brown fox").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hash_embedder_separates_unrelated_text() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("vector databases").await.unwrap();
        let b = embedder.embed("completely unrelated walrus").await.unwrap();
        assert_ne!(a, b);
    }
}
