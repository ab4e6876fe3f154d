//! HTTP surface over the pipeline (feature `http-server`).
//!
//! Thin by construction: handlers validate the wire shape, delegate to the
//! gateway or search service, and translate [`PipelineError`] onto status
//! codes. No pipeline semantics live here.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::model::{Document, SearchHit};
use crate::pipeline::Pipeline;

/// Build the router; serve it with `axum::serve`.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/documents", post(upload_document).get(list_documents))
        .route("/documents/{id}", get(get_document))
        .route("/search", get(search))
        .route("/status", get(status))
        .with_state(pipeline)
}

struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Unavailable { .. } | PipelineError::Timeout { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    document_id: Uuid,
    status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentView {
    id: Uuid,
    original_name: String,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_detail: Option<String>,
}

impl From<Document> for DocumentView {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            original_name: doc.original_name,
            status: doc.status.to_string(),
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            error_detail: doc.error_detail,
        }
    }
}

#[instrument(skip(pipeline, multipart))]
async fn upload_document(
    State(pipeline): State<Arc<Pipeline>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let field = multipart
        .next_field()
        .await
        .map_err(|err| PipelineError::Validation(format!("malformed multipart body: {err}")))?
        .ok_or_else(|| PipelineError::Validation("missing file field".to_string()))?;

    let name = field
        .file_name()
        .map(str::to_owned)
        .unwrap_or_else(|| "upload".to_string());
    let bytes = field
        .bytes()
        .await
        .map_err(|err| PipelineError::Validation(format!("unreadable upload: {err}")))?;

    let document_id = pipeline.gateway().submit(&bytes, &name).await?;
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            document_id,
            status: "pending",
        }),
    ))
}

async fn get_document(
    State(pipeline): State<Arc<Pipeline>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentView>, ApiError> {
    let doc = pipeline
        .metadata
        .fetch_document(id)
        .await?
        .ok_or(PipelineError::NotFound(id))?;
    Ok(Json(doc.into()))
}

async fn list_documents(
    State(pipeline): State<Arc<Pipeline>>,
) -> Result<Json<Vec<DocumentView>>, ApiError> {
    let docs = pipeline.metadata.list_recent(10).await?;
    Ok(Json(docs.into_iter().map(DocumentView::from).collect()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    q: String,
    top_k: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    hits: Vec<HitView>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HitView {
    chunk_id: Uuid,
    score: f32,
}

impl From<SearchHit> for HitView {
    fn from(hit: SearchHit) -> Self {
        Self {
            chunk_id: hit.chunk_id,
            score: hit.score,
        }
    }
}

#[instrument(skip(pipeline, params), fields(top_k = params.top_k))]
async fn search(
    State(pipeline): State<Arc<Pipeline>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let top_k = match params.top_k {
        Some(k) if k > 0 => k as usize,
        Some(_) => {
            return Err(PipelineError::Validation("topK must be positive".to_string()).into());
        }
        None => return Err(PipelineError::Validation("topK is required".to_string()).into()),
    };
    let hits = pipeline.search().search(&params.q, top_k).await?;
    Ok(Json(SearchResponse {
        hits: hits.into_iter().map(HitView::from).collect(),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    healthy: bool,
    metadata: bool,
    objects: bool,
    index: bool,
    cache: bool,
    queue: bool,
}

async fn status(State(pipeline): State<Arc<Pipeline>>) -> Json<StatusResponse> {
    let report = pipeline.health().await;
    Json(StatusResponse {
        healthy: report.healthy(),
        metadata: report.metadata,
        objects: report.objects,
        index: report.index,
        cache: report.cache,
        queue: report.queue,
    })
}
