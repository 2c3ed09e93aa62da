//! Row coercion: raw CSV records into typed metric and user records.
//!
//! Every failure names the offending line, column and raw value. A single bad
//! row fails the chunk it belongs to; nothing is retried.

use chrono::{DateTime, NaiveDate, Utc};

use crate::auth::PasswordService;
use crate::ingest::error::CoerceError;
use crate::ingest::types::{ExistenceMarker, MetricRecord, RawRow, UserImportRecord};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Cell contents treated as a missing value, matching common spreadsheet exports.
const NULL_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

const DEFAULT_ROLE: &str = "user";

fn non_null(raw: Option<&str>) -> Option<&str> {
    let value = raw?.trim();
    if NULL_TOKENS.contains(&value) {
        None
    } else {
        Some(value)
    }
}

fn malformed(row: &RawRow, column: &'static str, value: &str, reason: &'static str) -> CoerceError {
    CoerceError::MalformedRow {
        line: row.line(),
        column,
        value: value.to_string(),
        reason,
    }
}

fn required<'a>(row: &'a RawRow, column: &'static str) -> Result<&'a str, CoerceError> {
    let raw = row.value(column)?;
    non_null(raw).ok_or_else(|| malformed(row, column, raw.unwrap_or_default(), "value is required"))
}

fn parse_date(row: &RawRow, column: &'static str) -> Result<NaiveDate, CoerceError> {
    let value = required(row, column)?;
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| malformed(row, column, value, "expected a date formatted as YYYY-MM-DD"))
}

/// Integral text, or a float with no fractional part (`"42.0"`).
fn parse_integer(row: &RawRow, column: &'static str) -> Result<i64, CoerceError> {
    let value = required(row, column)?;
    if let Ok(parsed) = value.parse::<i64>() {
        return Ok(parsed);
    }
    match value.parse::<f64>() {
        Ok(float)
            if float.is_finite()
                && float.fract() == 0.0
                && float >= i64::MIN as f64
                && float <= i64::MAX as f64 =>
        {
            Ok(float as i64)
        }
        _ => Err(malformed(row, column, value, "expected an integer")),
    }
}

fn parse_float(row: &RawRow, column: &'static str) -> Result<f64, CoerceError> {
    let value = required(row, column)?;
    match value.parse::<f64>() {
        Ok(parsed) if !parsed.is_nan() => Ok(parsed),
        _ => Err(malformed(row, column, value, "expected a number")),
    }
}

/// Null tokens and NaN both map to `None`.
fn parse_optional_float(row: &RawRow, column: &'static str) -> Result<Option<f64>, CoerceError> {
    let Some(value) = non_null(row.value(column)?) else {
        return Ok(None);
    };
    match value.parse::<f64>() {
        Ok(parsed) if parsed.is_nan() => Ok(None),
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(malformed(row, column, value, "expected a number")),
    }
}

/// Coerce a metrics row. `ingested_at` becomes both audit timestamps.
pub fn coerce_metric(row: &RawRow, ingested_at: DateTime<Utc>) -> Result<MetricRecord, CoerceError> {
    Ok(MetricRecord {
        date: parse_date(row, "date")?,
        account_id: parse_integer(row, "account_id")?,
        campaign_id: parse_integer(row, "campaign_id")?,
        cost_micros: parse_optional_float(row, "cost_micros")?,
        clicks: parse_float(row, "clicks")?,
        conversions: parse_float(row, "conversions")?,
        impressions: parse_float(row, "impressions")?,
        interactions: parse_float(row, "interactions")?,
        created_at: ingested_at,
        updated_at: ingested_at,
    })
}

/// Coerce a user-import row, hashing its password exactly once.
///
/// `role` falls back to `user` when the column is absent or empty.
pub fn coerce_user(
    row: &RawRow,
    passwords: &PasswordService,
) -> Result<(UserImportRecord, ExistenceMarker), CoerceError> {
    let username = required(row, "username")?.to_string();
    let email = required(row, "email")?.to_string();

    // Passwords keep surrounding whitespace; only the null check is trimmed.
    let raw_password = row.value("password")?;
    let password = match raw_password {
        Some(value) if non_null(Some(value)).is_some() => value,
        _ => {
            return Err(malformed(
                row,
                "password",
                raw_password.unwrap_or_default(),
                "value is required",
            ));
        }
    };

    let role = if row.has_column("role") {
        non_null(row.value("role")?).unwrap_or(DEFAULT_ROLE)
    } else {
        DEFAULT_ROLE
    };

    let password_hash = passwords
        .hash_password(password)
        .map_err(|source| CoerceError::Credential {
            line: row.line(),
            source,
        })?;

    let marker = ExistenceMarker {
        username: username.clone(),
        email: email.clone(),
    };
    let record = UserImportRecord {
        username,
        email,
        password_hash,
        role: role.to_string(),
    };

    Ok((record, marker))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::config::PasswordCost;
    use csv_async::StringRecord;
    use std::sync::Arc;

    pub(crate) fn row(headers: &[&str], values: &[&str]) -> RawRow {
        RawRow::new(
            2,
            Arc::new(StringRecord::from(headers.to_vec())),
            StringRecord::from(values.to_vec()),
        )
    }

    pub(crate) fn cheap_passwords() -> PasswordService {
        PasswordService::with_cost(PasswordCost {
            m_cost_kib: 64,
            t_cost: 1,
            p_cost: 1,
        })
        .expect("password service")
    }

    const METRIC_HEADERS: &[&str] = &[
        "date",
        "account_id",
        "campaign_id",
        "cost_micros",
        "clicks",
        "conversions",
        "impressions",
        "interactions",
    ];

    #[test]
    fn coerces_metric_rows() {
        let now = Utc::now();
        let record = coerce_metric(
            &row(
                METRIC_HEADERS,
                &["2024-03-01", "12", "34.0", "1500000", "10", "2.5", "300", "12"],
            ),
            now,
        )
        .expect("valid row");

        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(record.account_id, 12);
        assert_eq!(record.campaign_id, 34);
        assert_eq!(record.cost_micros, Some(1_500_000.0));
        assert_eq!(record.conversions, 2.5);
        assert_eq!(record.created_at, now);
        assert_eq!(record.updated_at, now);
    }

    #[test]
    fn nan_cost_becomes_null() {
        let now = Utc::now();
        for cost in ["NaN", "", "nan", "NULL"] {
            let record = coerce_metric(
                &row(
                    METRIC_HEADERS,
                    &["2024-03-01", "1", "2", cost, "10", "1", "100", "5"],
                ),
                now,
            )
            .expect("valid row");
            assert_eq!(record.cost_micros, None, "cost {cost:?}");
            assert_eq!(record.clicks, 10.0);
            assert_eq!(record.impressions, 100.0);
        }
    }

    #[test]
    fn rejects_dates_in_other_formats() {
        let err = coerce_metric(
            &row(
                METRIC_HEADERS,
                &["03/01/2024", "1", "2", "3", "4", "5", "6", "7"],
            ),
            Utc::now(),
        )
        .expect_err("bad date");

        match err {
            CoerceError::MalformedRow {
                line,
                column,
                value,
                ..
            } => {
                assert_eq!(line, 2);
                assert_eq!(column, "date");
                assert_eq!(value, "03/01/2024");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn required_numbers_fail_on_text_or_null() {
        let err = coerce_metric(
            &row(
                METRIC_HEADERS,
                &["2024-03-01", "1", "2", "3", "many", "5", "6", "7"],
            ),
            Utc::now(),
        )
        .expect_err("non numeric clicks");
        assert!(matches!(
            err,
            CoerceError::MalformedRow {
                column: "clicks",
                ..
            }
        ));

        let err = coerce_metric(
            &row(
                METRIC_HEADERS,
                &["2024-03-01", "1", "2", "3", "4", "NaN", "6", "7"],
            ),
            Utc::now(),
        )
        .expect_err("null conversions");
        assert!(matches!(
            err,
            CoerceError::MalformedRow {
                column: "conversions",
                ..
            }
        ));
    }

    #[test]
    fn ids_must_be_integral() {
        let err = coerce_metric(
            &row(
                METRIC_HEADERS,
                &["2024-03-01", "1.5", "2", "3", "4", "5", "6", "7"],
            ),
            Utc::now(),
        )
        .expect_err("fractional id");
        assert!(matches!(
            err,
            CoerceError::MalformedRow {
                column: "account_id",
                ..
            }
        ));
    }

    #[test]
    fn missing_columns_are_reported_by_name() {
        let err = coerce_metric(
            &row(&["date", "account_id"], &["2024-03-01", "1"]),
            Utc::now(),
        )
        .expect_err("missing columns");
        assert!(matches!(
            err,
            CoerceError::MissingColumn {
                column: "campaign_id"
            }
        ));
    }

    #[test]
    fn hashes_user_passwords_during_coercion() {
        let passwords = cheap_passwords();
        let (record, marker) = coerce_user(
            &row(
                &["username", "email", "password", "role"],
                &["alice", "alice@example.com", "s3cret", "admin"],
            ),
            &passwords,
        )
        .expect("valid user row");

        assert_eq!(record.username, "alice");
        assert_eq!(record.role, "admin");
        assert_ne!(record.password_hash, "s3cret");
        assert!(
            passwords
                .verify_password("s3cret", &record.password_hash)
                .expect("verify")
        );
        assert_eq!(
            marker,
            ExistenceMarker {
                username: "alice".into(),
                email: "alice@example.com".into(),
            }
        );
    }

    #[test]
    fn user_role_defaults_to_user() {
        let passwords = cheap_passwords();
        let (record, _) = coerce_user(
            &row(
                &["username", "email", "password"],
                &["bob", "bob@example.com", "pw"],
            ),
            &passwords,
        )
        .expect("valid user row");
        assert_eq!(record.role, "user");

        let (record, _) = coerce_user(
            &row(
                &["username", "email", "password", "role"],
                &["bob", "bob@example.com", "pw", ""],
            ),
            &passwords,
        )
        .expect("valid user row");
        assert_eq!(record.role, "user");
    }

    #[test]
    fn user_rows_require_a_password() {
        let passwords = cheap_passwords();
        let err = coerce_user(
            &row(
                &["username", "email", "password"],
                &["carol", "carol@example.com", ""],
            ),
            &passwords,
        )
        .expect_err("empty password");
        assert!(matches!(
            err,
            CoerceError::MalformedRow {
                column: "password",
                ..
            }
        ));
    }
}
