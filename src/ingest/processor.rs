//! Per-chunk work: coerce every row, then bulk write the chunk.
//!
//! A chunk is all-or-nothing with respect to coercion: if any row fails to
//! coerce, nothing from the chunk reaches the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::auth::PasswordService;
use crate::ingest::coerce::{coerce_metric, coerce_user};
use crate::ingest::error::{ChunkError, CoerceError};
use crate::ingest::types::{
    ChunkSummary, ExistenceMarker, IngestTarget, MetricRecord, RawRow, UserImportRecord,
};
use crate::store::IngestStore;

/// Processes one chunk against a shared store.
#[derive(Clone)]
pub struct ChunkProcessor {
    store: Arc<dyn IngestStore>,
    passwords: Arc<PasswordService>,
}

impl ChunkProcessor {
    pub fn new(store: Arc<dyn IngestStore>, passwords: Arc<PasswordService>) -> Self {
        Self { store, passwords }
    }

    pub async fn process(
        &self,
        chunk: Vec<RawRow>,
        target: IngestTarget,
        ingested_at: DateTime<Utc>,
    ) -> Result<ChunkSummary, ChunkError> {
        match target {
            IngestTarget::Metrics => self.process_metrics(chunk, ingested_at).await,
            IngestTarget::Users => self.process_users(chunk).await,
        }
    }

    async fn process_metrics(
        &self,
        chunk: Vec<RawRow>,
        ingested_at: DateTime<Utc>,
    ) -> Result<ChunkSummary, ChunkError> {
        let records = chunk
            .iter()
            .map(|row| coerce_metric(row, ingested_at))
            .collect::<Result<Vec<MetricRecord>, CoerceError>>()?;

        if records.is_empty() {
            return Ok(ChunkSummary::default());
        }

        let written = self.store.insert_metrics(&records).await?;
        log::trace!("metrics chunk: {} rows, {} new", records.len(), written);

        Ok(ChunkSummary {
            row_count: records.len(),
            created: Vec::new(),
        })
    }

    async fn process_users(&self, chunk: Vec<RawRow>) -> Result<ChunkSummary, ChunkError> {
        // Hashing is CPU bound; keep it off the async workers.
        let passwords = Arc::clone(&self.passwords);
        let coerced = tokio::task::spawn_blocking(move || {
            chunk
                .iter()
                .map(|row| coerce_user(row, &passwords))
                .collect::<Result<Vec<(UserImportRecord, ExistenceMarker)>, CoerceError>>()
        })
        .await??;

        if coerced.is_empty() {
            return Ok(ChunkSummary::default());
        }

        let (records, markers): (Vec<UserImportRecord>, Vec<ExistenceMarker>) =
            coerced.into_iter().unzip();

        let written = self.store.insert_users(&records).await?;
        self.store.insert_existence_markers(&markers).await?;
        let created = self.store.find_users_by_identity(&markers).await?;
        log::trace!(
            "users chunk: {} rows, {} new, {} recovered",
            records.len(),
            written,
            created.len()
        );

        Ok(ChunkSummary {
            row_count: records.len(),
            created,
        })
    }
}
