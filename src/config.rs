//! Pipeline configuration.
//!
//! All knobs are plain values with coded defaults; [`PipelineConfig::from_env`]
//! overlays `RAGLINE_*` environment variables (a `.env` file is honored via
//! `dotenvy`). Endpoint-style settings (`database_url`, `object_store_root`,
//! `cache_url`) stay optional so the in-memory implementations can be used
//! without any environment at all.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration surface for the whole pipeline.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Metadata-store DSN (enables the Postgres backend when set).
    pub database_url: Option<String>,
    /// Root directory for the filesystem object store.
    pub object_store_root: Option<PathBuf>,
    /// Cache endpoint (enables the Redis backend when set).
    pub cache_url: Option<String>,
    /// TTL applied to cached search results.
    pub cache_ttl: Duration,
    /// Redeliveries granted to a failing job before it is dead-lettered.
    pub max_attempts: u32,
    /// Number of independent queue consumers in the worker pool.
    pub worker_count: usize,
    /// Embedding dimension D; a pipeline-wide invariant.
    pub embedding_dim: usize,
    /// Upload size ceiling in bytes.
    pub max_upload_bytes: usize,
    /// How long an unacknowledged delivery stays invisible before redelivery.
    pub visibility_timeout: Duration,
    /// Per-call budget for external stores and pluggable functions.
    pub op_timeout: Duration,
    /// Age after which a still-`Pending` document is considered stuck.
    pub sweep_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            object_store_root: None,
            cache_url: None,
            cache_ttl: Duration::from_secs(300),
            max_attempts: 3,
            worker_count: 2,
            embedding_dim: 384,
            max_upload_bytes: 10 * 1024 * 1024,
            visibility_timeout: Duration::from_secs(30),
            op_timeout: Duration::from_secs(5),
            sweep_grace: Duration::from_secs(300),
        }
    }
}

impl PipelineConfig {
    /// Build a config from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            database_url: std::env::var("RAGLINE_DATABASE_URL").ok(),
            object_store_root: std::env::var("RAGLINE_OBJECT_STORE_ROOT")
                .ok()
                .map(PathBuf::from),
            cache_url: std::env::var("RAGLINE_CACHE_URL").ok(),
            cache_ttl: env_secs("RAGLINE_CACHE_TTL_SECS", defaults.cache_ttl),
            max_attempts: env_parse("RAGLINE_MAX_ATTEMPTS", defaults.max_attempts),
            worker_count: env_parse("RAGLINE_WORKER_COUNT", defaults.worker_count),
            embedding_dim: env_parse("RAGLINE_EMBEDDING_DIM", defaults.embedding_dim),
            max_upload_bytes: env_parse("RAGLINE_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            visibility_timeout: env_secs(
                "RAGLINE_VISIBILITY_TIMEOUT_SECS",
                defaults.visibility_timeout,
            ),
            op_timeout: env_secs("RAGLINE_OP_TIMEOUT_SECS", defaults.op_timeout),
            sweep_grace: env_secs("RAGLINE_SWEEP_GRACE_SECS", defaults.sweep_grace),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.embedding_dim, 384);
        assert!(config.database_url.is_none());
    }
}
