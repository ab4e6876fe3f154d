//! Pipeline error taxonomy.
//!
//! Every fallible boundary in the crate returns [`PipelineError`]. The
//! variants map directly onto how a failure is treated:
//!
//! - `Validation` / `TooLarge`: bad input, rejected at the request boundary,
//!   never retried.
//! - `Unavailable` / `Timeout`: transient dependency failure, retried with
//!   backoff at the calling layer and surfaced as 503 once retries are
//!   exhausted.
//! - `Processing` / `InvalidVector`: per-document failure, caught by the
//!   worker, recorded on the document, and routed through the
//!   retry/dead-letter path.
//! - `Conflict`: a status guard lost the race; treated as a benign duplicate.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    /// Request input failed validation.
    #[error("invalid input: {0}")]
    #[diagnostic(code(ragline::validation))]
    Validation(String),

    /// Upload exceeded the configured size ceiling.
    #[error("upload of {size} bytes exceeds the {limit}-byte ceiling")]
    #[diagnostic(code(ragline::too_large))]
    TooLarge { size: usize, limit: usize },

    /// A dependent store could not be reached or answered with an error.
    #[error("{service} unavailable: {message}")]
    #[diagnostic(
        code(ragline::unavailable),
        help("Transient failures are retried with backoff at the request boundary.")
    )]
    Unavailable {
        service: &'static str,
        message: String,
    },

    /// A call to a dependent store or pluggable function exceeded its budget.
    #[error("{operation} timed out after {}ms", .budget.as_millis())]
    #[diagnostic(code(ragline::timeout))]
    Timeout {
        operation: &'static str,
        budget: Duration,
    },

    /// Extraction, chunking, embedding, or persistence failed for one
    /// document. Never propagates past the worker boundary.
    #[error("processing failed: {0}")]
    #[diagnostic(code(ragline::processing))]
    Processing(String),

    /// Embedding rejected at the vector index boundary.
    #[error("invalid vector: {0}")]
    #[diagnostic(
        code(ragline::invalid_vector),
        help("Embeddings must have exactly the configured dimension and only finite components.")
    )]
    InvalidVector(String),

    /// A conditional status update found the document already claimed.
    #[error("status guard lost the race for document {document_id}")]
    #[diagnostic(code(ragline::conflict))]
    Conflict { document_id: Uuid },

    /// Lookup for an unknown document.
    #[error("document {0} not found")]
    #[diagnostic(code(ragline::not_found))]
    NotFound(Uuid),

    /// JSON serialization failure on a wire or cache payload.
    #[error(transparent)]
    #[diagnostic(code(ragline::serde_json))]
    Serde(#[from] serde_json::Error),
}

impl PipelineError {
    /// Shorthand for wrapping a dependency failure.
    pub fn unavailable(service: &'static str, err: impl std::fmt::Display) -> Self {
        PipelineError::Unavailable {
            service,
            message: err.to_string(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Unavailable { .. } | PipelineError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_covers_dependency_failures_only() {
        assert!(PipelineError::unavailable("cache", "refused").is_transient());
        assert!(
            PipelineError::Timeout {
                operation: "embed",
                budget: Duration::from_secs(1),
            }
            .is_transient()
        );
        assert!(!PipelineError::Validation("empty".into()).is_transient());
        assert!(!PipelineError::Processing("boom".into()).is_transient());
    }
}
