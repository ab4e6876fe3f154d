//! External store seams: durable byte blobs and relational metadata.
//!
//! Both traits model independently-failing network services. The in-memory
//! implementations exist for tests and single-process use; the filesystem
//! object store and the Postgres metadata store (behind the `postgres`
//! feature) are the durable backends.

pub mod metadata;
pub mod object;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use metadata::{ClaimOutcome, MemoryMetadataStore, MetadataStore};
pub use object::{FsObjectStore, MemoryObjectStore, ObjectStore};
#[cfg(feature = "postgres")]
pub use postgres::PostgresMetadataStore;
