use chrono::{DateTime, NaiveDate, Utc};
use rocket_db_pools::sqlx::FromRow;
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};

// ===== Metric Models =====

/// Stored advertising metric row as exposed by `GET /metrics`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct Metric {
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

// ===== Pagination Models =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Pagination {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub pages: i64,
}

impl Pagination {
    pub fn new(total: i64, page: i64, page_size: i64) -> Self {
        let pages = if page_size > 0 {
            (total + page_size - 1) / page_size
        } else {
            0
        };
        Self {
            total,
            page,
            page_size,
            pages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MetricsResponse {
    pub data: Vec<Metric>,
    pub pagination: Pagination,
}

// ===== Misc =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageResponse {
    pub message: String,
}
