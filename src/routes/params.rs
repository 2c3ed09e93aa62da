//! Query parameter types for the metrics listing.
//!
//! These types follow Rocket's `FromForm` conventions and derive `JsonSchema`
//! so the generated OpenAPI document lists every parameter and its default.

use chrono::NaiveDate;
use rocket::form::{self, FromFormField, ValueField};
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};

const MAX_PAGE_SIZE: i64 = 100;

/// Wrapper for parsing ISO-8601 dates from query parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct DateParam(pub NaiveDate);

impl<'r> FromFormField<'r> for DateParam {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        let trimmed = field.value.trim();
        match NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            Ok(date) => Ok(DateParam(date)),
            Err(_) => Err(form::Error::validation(format!(
                "invalid date '{}', expected YYYY-MM-DD",
                field.value
            )))?,
        }
    }
}

/// Sort direction for list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Sort ascending.
    #[default]
    Asc,
    /// Sort descending.
    Desc,
}

impl SortOrder {
    /// Render the sort order as a SQL keyword.
    pub fn sql_keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl<'r> FromFormField<'r> for SortOrder {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        match field.value.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(form::Error::validation(format!(
                "invalid sort order '{other}'; expected 'asc' or 'desc'"
            ))
            .into()),
        }
    }
}

/// Columns the metrics listing may be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MetricSortField {
    Date,
    AccountId,
    CampaignId,
    CostMicros,
    Clicks,
    Conversions,
    Impressions,
    Interactions,
    CreatedAt,
    UpdatedAt,
}

impl MetricSortField {
    /// Column name; doubles as the accepted query value.
    pub fn column(self) -> &'static str {
        match self {
            MetricSortField::Date => "date",
            MetricSortField::AccountId => "account_id",
            MetricSortField::CampaignId => "campaign_id",
            MetricSortField::CostMicros => "cost_micros",
            MetricSortField::Clicks => "clicks",
            MetricSortField::Conversions => "conversions",
            MetricSortField::Impressions => "impressions",
            MetricSortField::Interactions => "interactions",
            MetricSortField::CreatedAt => "created_at",
            MetricSortField::UpdatedAt => "updated_at",
        }
    }

    const ALL: [MetricSortField; 10] = [
        MetricSortField::Date,
        MetricSortField::AccountId,
        MetricSortField::CampaignId,
        MetricSortField::CostMicros,
        MetricSortField::Clicks,
        MetricSortField::Conversions,
        MetricSortField::Impressions,
        MetricSortField::Interactions,
        MetricSortField::CreatedAt,
        MetricSortField::UpdatedAt,
    ];
}

impl<'r> FromFormField<'r> for MetricSortField {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        let value = field.value.trim();
        MetricSortField::ALL
            .into_iter()
            .find(|candidate| candidate.column() == value)
            .ok_or_else(|| {
                form::Error::validation(format!("cannot sort metrics by '{value}'")).into()
            })
    }
}

/// Query parameters accepted by `GET /metrics`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, rocket::form::FromForm)]
pub struct MetricListParams {
    /// One-based page index (defaults to the first page).
    #[field(default = 1)]
    pub page: i64,
    /// Rows per page (clamped between 1 and 100, default 20).
    #[field(default = 20)]
    pub page_size: i64,
    /// Inclusive lower bound on `date`.
    pub start_date: Option<DateParam>,
    /// Inclusive upper bound on `date`.
    pub end_date: Option<DateParam>,
    /// Sort column; newest dates first when absent.
    pub sort_by: Option<MetricSortField>,
    /// Direction applied to `sort_by` (default ascending).
    pub order: Option<SortOrder>,
}

impl Default for MetricListParams {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            start_date: None,
            end_date: None,
            sort_by: None,
            order: None,
        }
    }
}

impl MetricListParams {
    pub fn page(&self) -> i64 {
        self.page.max(1)
    }

    pub fn page_size(&self) -> i64 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.page_size()
    }

    /// `ORDER BY` clause built only from whitelisted columns.
    pub fn order_clause(&self) -> String {
        match self.sort_by {
            Some(field) => format!(
                "{} {}, id ASC",
                field.column(),
                self.order.unwrap_or_default().sql_keyword()
            ),
            None => "date DESC, id DESC".to_string(),
        }
    }
}
