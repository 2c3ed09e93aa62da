//! HTTP route handlers grouped by resource.
//!
//! Handlers are annotated with `#[openapi]` so `rocket_okapi` can derive an
//! OpenAPI document automatically. Authentication handlers live in
//! [`crate::auth::routes`].

pub mod health;
pub mod metrics;
pub mod params;
pub mod populate;
