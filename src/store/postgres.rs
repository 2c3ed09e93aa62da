use rocket_db_pools::sqlx::{self, PgPool};

use crate::ingest::types::{ExistenceMarker, MetricRecord, UserAccount, UserImportRecord};
use crate::store::{IngestStore, StoreError};

/// Postgres-backed store. Each call is a single UNNEST statement.
#[derive(Clone)]
pub struct PgIngestStore {
    pool: PgPool,
}

impl PgIngestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn identity_columns(identities: &[ExistenceMarker]) -> (Vec<String>, Vec<String>) {
    identities
        .iter()
        .map(|identity| (identity.username.clone(), identity.email.clone()))
        .unzip()
}

#[rocket::async_trait]
impl IngestStore for PgIngestStore {
    async fn insert_metrics(&self, records: &[MetricRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut dates = Vec::with_capacity(records.len());
        let mut account_ids = Vec::with_capacity(records.len());
        let mut campaign_ids = Vec::with_capacity(records.len());
        let mut costs = Vec::with_capacity(records.len());
        let mut clicks = Vec::with_capacity(records.len());
        let mut conversions = Vec::with_capacity(records.len());
        let mut impressions = Vec::with_capacity(records.len());
        let mut interactions = Vec::with_capacity(records.len());
        let mut created = Vec::with_capacity(records.len());
        let mut updated = Vec::with_capacity(records.len());

        for record in records {
            dates.push(record.date);
            account_ids.push(record.account_id);
            campaign_ids.push(record.campaign_id);
            costs.push(record.cost_micros);
            clicks.push(record.clicks);
            conversions.push(record.conversions);
            impressions.push(record.impressions);
            interactions.push(record.interactions);
            created.push(record.created_at);
            updated.push(record.updated_at);
        }

        let result = sqlx::query(
            r#"INSERT INTO metrics (
                   date, account_id, campaign_id, cost_micros, clicks,
                   conversions, impressions, interactions, created_at, updated_at
               )
               SELECT * FROM UNNEST(
                   $1::date[],
                   $2::bigint[],
                   $3::bigint[],
                   $4::float8[],
                   $5::float8[],
                   $6::float8[],
                   $7::float8[],
                   $8::float8[],
                   $9::timestamptz[],
                   $10::timestamptz[]
               )
               ON CONFLICT (date, account_id, campaign_id) DO NOTHING"#,
        )
        .bind(&dates)
        .bind(&account_ids)
        .bind(&campaign_ids)
        .bind(&costs)
        .bind(&clicks)
        .bind(&conversions)
        .bind(&impressions)
        .bind(&interactions)
        .bind(&created)
        .bind(&updated)
        .execute(&self.pool)
        .await?;

        log::trace!(
            "bulk inserted {} of {} metric rows",
            result.rows_affected(),
            records.len()
        );
        Ok(result.rows_affected())
    }

    async fn insert_users(&self, records: &[UserImportRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut usernames = Vec::with_capacity(records.len());
        let mut emails = Vec::with_capacity(records.len());
        let mut hashes = Vec::with_capacity(records.len());
        let mut roles = Vec::with_capacity(records.len());
        for record in records {
            usernames.push(record.username.as_str());
            emails.push(record.email.as_str());
            hashes.push(record.password_hash.as_str());
            roles.push(record.role.as_str());
        }

        let result = sqlx::query(
            r#"INSERT INTO users (username, email, password, role)
               SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])
               ON CONFLICT (username, email) DO NOTHING"#,
        )
        .bind(&usernames)
        .bind(&emails)
        .bind(&hashes)
        .bind(&roles)
        .execute(&self.pool)
        .await?;

        log::trace!(
            "bulk inserted {} of {} users",
            result.rows_affected(),
            records.len()
        );
        Ok(result.rows_affected())
    }

    async fn insert_existence_markers(
        &self,
        markers: &[ExistenceMarker],
    ) -> Result<u64, StoreError> {
        if markers.is_empty() {
            return Ok(0);
        }

        let (usernames, emails) = identity_columns(markers);
        let result = sqlx::query(
            r#"INSERT INTO existents (username, email)
               SELECT * FROM UNNEST($1::text[], $2::text[])
               ON CONFLICT (username, email) DO NOTHING"#,
        )
        .bind(&usernames)
        .bind(&emails)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_users_by_identity(
        &self,
        identities: &[ExistenceMarker],
    ) -> Result<Vec<UserAccount>, StoreError> {
        if identities.is_empty() {
            return Ok(Vec::new());
        }

        let (usernames, emails) = identity_columns(identities);
        let users = sqlx::query_as::<_, UserAccount>(
            r#"SELECT id, username, email, role
               FROM users
               WHERE (username, email) IN (
                   SELECT * FROM UNNEST($1::text[], $2::text[])
               )
               ORDER BY id"#,
        )
        .bind(&usernames)
        .bind(&emails)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }
}
