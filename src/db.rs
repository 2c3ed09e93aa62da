use rocket_db_pools::{Database, sqlx};

#[derive(Database)]
#[database("case_db")]
pub struct CaseDb(sqlx::PgPool);

/// Idempotent DDL applied at ignition. Identities are `(username, email)`
/// pairs; metrics are unique per day, account and campaign.
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
           id SERIAL PRIMARY KEY,
           username TEXT NOT NULL,
           email TEXT NOT NULL,
           password TEXT NOT NULL,
           role TEXT NOT NULL DEFAULT 'user',
           created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
           UNIQUE (username, email)
       )"#,
    "CREATE INDEX IF NOT EXISTS users_email_idx ON users (email)",
    r#"CREATE TABLE IF NOT EXISTS existents (
           id SERIAL PRIMARY KEY,
           username TEXT NOT NULL,
           email TEXT NOT NULL,
           created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
           UNIQUE (username, email)
       )"#,
    r#"CREATE TABLE IF NOT EXISTS metrics (
           id BIGSERIAL PRIMARY KEY,
           date DATE NOT NULL,
           account_id BIGINT NOT NULL,
           campaign_id BIGINT NOT NULL,
           cost_micros DOUBLE PRECISION,
           clicks DOUBLE PRECISION NOT NULL,
           conversions DOUBLE PRECISION NOT NULL,
           impressions DOUBLE PRECISION NOT NULL,
           interactions DOUBLE PRECISION NOT NULL,
           created_at TIMESTAMPTZ NOT NULL,
           updated_at TIMESTAMPTZ NOT NULL,
           UNIQUE (date, account_id, campaign_id)
       )"#,
];

/// Create any missing tables and indexes.
pub async fn ensure_schema(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    log::info!("ensuring database schema");
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    log::info!("database schema ready");
    Ok(())
}
