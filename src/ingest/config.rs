use std::env;

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

/// Tuning for the bulk ingestion pipeline.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Data rows per chunk; the last chunk may be shorter.
    pub chunk_size: usize,
    /// Maximum chunk bodies executing at once.
    pub max_concurrency: usize,
    /// Largest accepted upload, in MiB.
    pub upload_limit_mib: usize,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            chunk_size: env_usize("CASE_INGEST_CHUNK_SIZE", defaults.chunk_size),
            max_concurrency: env_usize("CASE_INGEST_MAX_CONCURRENCY", defaults.max_concurrency),
            upload_limit_mib: env_usize("CASE_UPLOAD_LIMIT_MIB", defaults.upload_limit_mib),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            max_concurrency: 10,
            upload_limit_mib: 64,
        }
    }
}
