//! # Ragline: Asynchronous Document Ingestion and Retrieval
//!
//! Ragline is a coordination layer for document pipelines: uploads land in an
//! object store, a queue hands them to a pool of workers that extract, chunk,
//! and embed, and a cached search path answers similarity queries over the
//! result. Every dependency sits behind a trait, and every trait ships an
//! in-memory implementation, so the whole pipeline runs inside a single test.
//!
//! ## Core Concepts
//!
//! - **Gateway**: accepts uploads, persists blob + metadata, enqueues a job
//! - **Queue**: at-least-once delivery with visibility-timeout redelivery
//! - **Workers**: claim documents via compare-and-swap, transform, and settle
//! - **Index**: cosine-similarity nearest neighbors over chunk embeddings
//! - **Search**: read-through cache in front of embed-and-query
//!
//! ## Quick Start
//!
//! ```
//! use ragline::{Pipeline, PipelineConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> ragline::Result<()> {
//! let pipeline = Pipeline::builder(PipelineConfig::default()).build();
//! let workers = pipeline.start_workers();
//!
//! let id = pipeline
//!     .gateway()
//!     .submit(b"quarterly emissions report", "report.txt")
//!     .await?;
//! println!("accepted document {id}");
//!
//! workers.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! Durable backends are opt-in through features: `postgres` for the metadata
//! store, `cache-redis` for the search cache, and `http-server` for the REST
//! surface.

pub mod cache;
pub mod config;
pub mod errors;
#[cfg(feature = "http-server")]
pub mod http;
pub mod index;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod search;
pub mod stores;
pub mod transform;
pub mod worker;

pub use config::PipelineConfig;
pub use errors::{PipelineError, Result};
pub use ingest::IngestionGateway;
pub use model::{Chunk, Document, DocumentStatus, ProcessingJob, SearchHit, VectorRecord};
pub use pipeline::{HealthReport, Pipeline, PipelineBuilder};
pub use search::SearchService;
pub use worker::{Worker, WorkerPool};
