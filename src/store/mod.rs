//! Storage seam for the ingestion pipeline.
//!
//! Every write is a bulk insert that silently skips rows whose unique key is
//! already present. Implementations must be shareable across chunk tasks.

use thiserror::Error;

use crate::ingest::types::{ExistenceMarker, MetricRecord, UserAccount, UserImportRecord};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgIngestStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rocket_db_pools::sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[rocket::async_trait]
pub trait IngestStore: Send + Sync {
    /// Insert metric rows, skipping existing `(date, account_id, campaign_id)` keys.
    /// Returns the number of rows actually written.
    async fn insert_metrics(&self, records: &[MetricRecord]) -> Result<u64, StoreError>;

    /// Insert user credentials, skipping existing `(username, email)` pairs.
    async fn insert_users(&self, records: &[UserImportRecord]) -> Result<u64, StoreError>;

    /// Insert existence markers, skipping existing `(username, email)` pairs.
    async fn insert_existence_markers(&self, markers: &[ExistenceMarker])
    -> Result<u64, StoreError>;

    /// Stored users whose `(username, email)` matches one of `identities`.
    async fn find_users_by_identity(
        &self,
        identities: &[ExistenceMarker],
    ) -> Result<Vec<UserAccount>, StoreError>;
}
