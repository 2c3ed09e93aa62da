use thiserror::Error;
use tokio::task::JoinError;

use crate::auth::AuthError;
use crate::store::StoreError;

/// A single row could not be turned into a typed record.
#[derive(Debug, Error)]
pub enum CoerceError {
    #[error("line {line}: column '{column}' has invalid value '{value}': {reason}")]
    MalformedRow {
        line: u64,
        column: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("missing required column '{column}'")]
    MissingColumn { column: &'static str },
    #[error("line {line}: failed to hash password: {source}")]
    Credential {
        line: u64,
        #[source]
        source: AuthError,
    },
}

/// First failure inside one chunk.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error(transparent)]
    Coerce(#[from] CoerceError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("chunk worker failed: {0}")]
    Worker(#[from] JoinError),
    #[error("admission gate closed")]
    GateClosed,
}

/// Failure of a whole ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("chunk {index} failed: {source}")]
    Chunk {
        index: usize,
        #[source]
        source: ChunkError,
    },
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv_async::Error),
    #[error("failed to read upload: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV input has no header row")]
    MissingHeader,
    #[error("failed to issue token for '{username}': {source}")]
    Token {
        username: String,
        #[source]
        source: AuthError,
    },
    #[error("chunk task failed: {0}")]
    Worker(#[from] JoinError),
}
