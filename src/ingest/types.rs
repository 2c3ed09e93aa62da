//! Records flowing through the ingestion pipeline.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use csv_async::StringRecord;
use rocket::form::{self, FromFormField, ValueField};
use rocket_db_pools::sqlx;
use serde::{Deserialize, Serialize};

use crate::ingest::error::CoerceError;

/// Table an upload is written into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestTarget {
    Users,
    Metrics,
}

impl IngestTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestTarget::Users => "users",
            IngestTarget::Metrics => "metrics",
        }
    }
}

impl fmt::Display for IngestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'r> FromFormField<'r> for IngestTarget {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        match field.value {
            "users" => Ok(IngestTarget::Users),
            "metrics" => Ok(IngestTarget::Metrics),
            other => Err(form::Error::validation(format!(
                "invalid target '{other}'; expected 'users' or 'metrics'"
            ))
            .into()),
        }
    }
}

/// One CSV data record together with the header row it belongs to.
#[derive(Debug, Clone)]
pub struct RawRow {
    line: u64,
    headers: Arc<StringRecord>,
    record: StringRecord,
}

impl RawRow {
    pub fn new(line: u64, headers: Arc<StringRecord>, record: StringRecord) -> Self {
        Self {
            line,
            headers,
            record,
        }
    }

    /// 1-based line number in the uploaded file.
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Raw value of `column`; `None` when the record is shorter than the header.
    pub fn value(&self, column: &'static str) -> Result<Option<&str>, CoerceError> {
        let index = self
            .headers
            .iter()
            .position(|header| header == column)
            .ok_or(CoerceError::MissingColumn { column })?;
        Ok(self.record.get(index))
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|header| header == column)
    }
}

/// Typed metric row. `created_at` and `updated_at` carry the upload's start time.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub date: NaiveDate,
    pub account_id: i64,
    pub campaign_id: i64,
    pub cost_micros: Option<f64>,
    pub clicks: f64,
    pub conversions: f64,
    pub impressions: f64,
    pub interactions: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Credential row for an imported user. The password is already hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserImportRecord {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
}

/// Identity written to the `existents` table alongside each imported user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExistenceMarker {
    pub username: String,
    pub email: String,
}

/// Stored user as recovered after a bulk write.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserAccount {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub role: String,
}

/// Outcome of one processed chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkSummary {
    /// Rows attempted, including rows the store skipped as duplicates.
    pub row_count: usize,
    /// Users matching the chunk's identities after the write (users target only).
    pub created: Vec<UserAccount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub username: String,
    pub email: String,
    pub access_token: String,
}

/// Response body of a successful upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResult {
    pub status: String,
    pub rows: usize,
    pub target: IngestTarget,
    /// Always serialized; `null` for metric uploads.
    pub tokens: Option<Vec<IssuedToken>>,
}

impl IngestResult {
    pub fn success(rows: usize, target: IngestTarget, tokens: Option<Vec<IssuedToken>>) -> Self {
        Self {
            status: "success".to_string(),
            rows,
            target,
            tokens,
        }
    }
}
