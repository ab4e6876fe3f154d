//! Core data model for the ingestion and retrieval pipeline.
//!
//! These types flow between the gateway, the queue, the workers, and the
//! search path. They are deliberately plain: all coordination state lives in
//! the external stores, never in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a document as it moves through the pipeline.
///
/// Created as `Pending` by the ingestion gateway; mutated only by workers,
/// which move it to `Processing` on claim and `Ready` or `Failed` on
/// completion. The status column is the pipeline's mutual-exclusion point:
/// the `Pending -> Processing` transition is a compare-and-swap, so two
/// workers can never process the same document concurrently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    /// Stable string encoding used by relational storage and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        }
    }

    /// Decode the stable string form. Returns `None` for unknown values.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "ready" => Some(DocumentStatus::Ready),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object-store key for a document's raw upload.
pub fn blob_key(document_id: Uuid) -> String {
    format!("documents/{document_id}/original")
}

/// Metadata record for an uploaded document.
///
/// Never deleted by the pipeline; deletion is an external admin concern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub original_name: String,
    pub blob_key: String,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_detail: Option<String>,
}

impl Document {
    /// Create a fresh `Pending` document with a generated id and blob key.
    pub fn new(original_name: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            original_name: original_name.into(),
            blob_key: blob_key(id),
            status: DocumentStatus::Pending,
            created_at: now,
            updated_at: now,
            error_detail: None,
        }
    }
}

/// A contiguous segment of a document's extracted text, the unit of
/// embedding and retrieval. Created as a batch during processing and
/// immutable thereafter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub sequence_index: u32,
    pub text: String,
    pub vector_id: Uuid,
}

/// Embedding vector keyed by chunk, owned by the vector index.
///
/// Every embedding written or queried must have exactly the pipeline's
/// configured dimension; the index rejects everything else at the boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub vector_id: Uuid,
    pub embedding: Vec<f32>,
    pub chunk_id: Uuid,
}

/// Message carried by the queue between enqueue and acknowledgment.
///
/// Ephemeral: owned by whichever worker currently holds the delivery.
/// `attempt` starts at zero and is incremented on every redelivery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub document_id: Uuid,
    pub blob_key: String,
    pub enqueued_at: DateTime<Utc>,
    pub attempt: u32,
}

impl ProcessingJob {
    pub fn new(document_id: Uuid, blob_key: impl Into<String>) -> Self {
        Self {
            document_id,
            blob_key: blob_key.into(),
            enqueued_at: Utc::now(),
            attempt: 0,
        }
    }

    /// The same job, one attempt later. Used by redelivery paths.
    #[must_use]
    pub fn retry(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

/// One ranked result from a similarity query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: Uuid,
    pub score: f32,
}
