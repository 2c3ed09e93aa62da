//! Paginated read access to ingested metrics.

use rocket::serde::json::Json;
use rocket::{State, get};
use rocket_db_pools::sqlx;
use rocket_okapi::openapi;

use crate::error::{ApiError, ApiResult};
use crate::models::{Metric, MetricsResponse, Pagination};
use crate::routes::params::MetricListParams;

const DATE_FILTER: &str =
    "($1::date IS NULL OR date >= $1) AND ($2::date IS NULL OR date <= $2)";

/// List metrics with optional inclusive date filtering and sorting.
///
/// Without `sort_by` rows come back newest date first; `sort_by` is limited
/// to metric columns and sorts ascending unless `order=desc`.
#[openapi(tag = "Metrics")]
#[get("/metrics?<params..>")]
pub async fn list_metrics(
    pool: &State<sqlx::PgPool>,
    params: MetricListParams,
) -> ApiResult<MetricsResponse> {
    let start = params.start_date.map(|date| date.0);
    let end = params.end_date.map(|date| date.0);
    let page = params.page();
    let page_size = params.page_size();

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM metrics WHERE {DATE_FILTER}"))
        .bind(start)
        .bind(end)
        .fetch_one(pool.inner())
        .await
        .map_err(ApiError::from)?;

    let sql = format!(
        r#"SELECT date, account_id, campaign_id, cost_micros, clicks, conversions,
                  impressions, interactions, created_at, updated_at
           FROM metrics
           WHERE {DATE_FILTER}
           ORDER BY {}
           LIMIT $3 OFFSET $4"#,
        params.order_clause()
    );
    let data = sqlx::query_as::<_, Metric>(&sql)
        .bind(start)
        .bind(end)
        .bind(page_size)
        .bind(params.offset())
        .fetch_all(pool.inner())
        .await
        .map_err(ApiError::from)?;

    log::debug!(
        "listed {} of {} metrics (page {}, size {})",
        data.len(),
        total,
        page,
        page_size
    );

    Ok(Json(MetricsResponse {
        data,
        pagination: Pagination::new(total, page, page_size),
    }))
}
