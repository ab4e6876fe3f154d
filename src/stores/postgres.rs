//! Postgres-backed metadata store.
//!
//! The status guard is pushed down into SQL as a single conditional
//! `UPDATE ... WHERE status IN ('pending', 'failed')`, which gives the
//! compare-and-swap semantics the worker coordination relies on without any
//! application-side locking.
//!
//! ## Schema
//!
//! - `documents(id UUID PK, original_name, blob_key, status, created_at,
//!   updated_at, error_detail)`
//! - `chunks(id UUID PK, document_id UUID FK -> documents, sequence_index,
//!   text, vector_id)`

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::instrument;
use uuid::Uuid;

use crate::errors::{PipelineError, Result};
use crate::model::{Chunk, Document, DocumentStatus};
use crate::stores::metadata::{ClaimOutcome, MetadataStore};

const SERVICE: &str = "metadata store";

pub struct PostgresMetadataStore {
    pool: Arc<PgPool>,
}

impl std::fmt::Debug for PostgresMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresMetadataStore").finish()
    }
}

impl PostgresMetadataStore {
    /// Connect to `database_url` and ensure the schema exists (idempotent).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|err| PipelineError::unavailable(SERVICE, err))?;
        let store = Self {
            pool: Arc::new(pool),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id UUID PRIMARY KEY,
                original_name TEXT NOT NULL,
                blob_key TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                error_detail TEXT
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|err| PipelineError::unavailable(SERVICE, err))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id UUID PRIMARY KEY,
                document_id UUID NOT NULL REFERENCES documents(id),
                sequence_index INT NOT NULL,
                text TEXT NOT NULL,
                vector_id UUID NOT NULL
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|err| PipelineError::unavailable(SERVICE, err))?;

        Ok(())
    }

    fn row_to_document(row: &PgRow) -> Result<Document> {
        let status_raw: String = row.get("status");
        let status = DocumentStatus::parse(&status_raw).ok_or_else(|| {
            PipelineError::Unavailable {
                service: SERVICE,
                message: format!("unknown status value {status_raw:?}"),
            }
        })?;
        Ok(Document {
            id: row.get("id"),
            original_name: row.get("original_name"),
            blob_key: row.get("blob_key"),
            status,
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
            error_detail: row.get("error_detail"),
        })
    }
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    #[instrument(skip(self, doc), fields(document_id = %doc.id), err)]
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, original_name, blob_key, status, created_at, updated_at, error_detail)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(doc.id)
        .bind(&doc.original_name)
        .bind(&doc.blob_key)
        .bind(doc.status.as_str())
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .bind(&doc.error_detail)
        .execute(&*self.pool)
        .await
        .map_err(|err| PipelineError::unavailable(SERVICE, err))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn fetch_document(&self, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|err| PipelineError::unavailable(SERVICE, err))?;
        row.as_ref().map(Self::row_to_document).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_recent(&self, limit: usize) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY created_at DESC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|err| PipelineError::unavailable(SERVICE, err))?;
        rows.iter().map(Self::row_to_document).collect()
    }

    #[instrument(skip(self), err)]
    async fn claim_for_processing(&self, id: Uuid) -> Result<ClaimOutcome> {
        // Single conditional update: compare-and-swap on the status column.
        let claimed = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'processing', updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'failed')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|err| PipelineError::unavailable(SERVICE, err))?;

        if let Some(row) = claimed {
            return Ok(ClaimOutcome::Claimed(Self::row_to_document(&row)?));
        }

        // Lost the race or the document is gone; classify which.
        match self.fetch_document(id).await? {
            Some(doc) => Ok(ClaimOutcome::Duplicate(doc.status)),
            None => Ok(ClaimOutcome::Missing),
        }
    }

    #[instrument(skip(self, chunks), fields(chunk_count = chunks.len()), err)]
    async fn complete_with_chunks(&self, id: Uuid, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| PipelineError::unavailable(SERVICE, err))?;

        // Replace any chunks from an earlier attempt so duplicate passes
        // can never double-write.
        sqlx::query("DELETE FROM chunks WHERE document_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|err| PipelineError::unavailable(SERVICE, err))?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, sequence_index, text, vector_id)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(chunk.id)
            .bind(chunk.document_id)
            .bind(chunk.sequence_index as i32)
            .bind(&chunk.text)
            .bind(chunk.vector_id)
            .execute(&mut *tx)
            .await
            .map_err(|err| PipelineError::unavailable(SERVICE, err))?;
        }

        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'ready', error_detail = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|err| PipelineError::unavailable(SERVICE, err))?;

        tx.commit()
            .await
            .map_err(|err| PipelineError::unavailable(SERVICE, err))
    }

    #[instrument(skip(self, detail), err)]
    async fn mark_failed(&self, id: Uuid, detail: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| PipelineError::unavailable(SERVICE, err))?;

        // A failed document keeps zero chunks.
        sqlx::query("DELETE FROM chunks WHERE document_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|err| PipelineError::unavailable(SERVICE, err))?;

        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'failed', error_detail = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(detail)
        .execute(&mut *tx)
        .await
        .map_err(|err| PipelineError::unavailable(SERVICE, err))?;

        tx.commit()
            .await
            .map_err(|err| PipelineError::unavailable(SERVICE, err))
    }

    #[instrument(skip(self), err)]
    async fn chunks_for_document(&self, id: Uuid) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE document_id = $1 ORDER BY sequence_index ASC",
        )
        .bind(id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|err| PipelineError::unavailable(SERVICE, err))?;

        Ok(rows
            .iter()
            .map(|row| Chunk {
                id: row.get("id"),
                document_id: row.get("document_id"),
                sequence_index: row.get::<i32, _>("sequence_index") as u32,
                text: row.get("text"),
                vector_id: row.get("vector_id"),
            })
            .collect())
    }

    #[instrument(skip(self), err)]
    async fn stale_pending(&self, older_than: DateTime<Utc>) -> Result<Vec<Document>> {
        let rows =
            sqlx::query("SELECT * FROM documents WHERE status = 'pending' AND updated_at < $1")
                .bind(older_than)
                .fetch_all(&*self.pool)
                .await
                .map_err(|err| PipelineError::unavailable(SERVICE, err))?;
        rows.iter().map(Self::row_to_document).collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map(|_| ())
            .map_err(|err| PipelineError::unavailable(SERVICE, err))
    }
}
