use std::sync::LazyLock;

use regex::Regex;
use rocket::serde::json::Json;
use rocket::{State, post};
use rocket_db_pools::sqlx::{self, Row};
use rocket_okapi::openapi;

use crate::auth::AuthState;
use crate::auth::responses::{LoginRequest, TokenResponse, UserCreate};
use crate::error::{ApiError, ApiResult};

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w.-]+@[\w.-]+\.\w+$").expect("email pattern compiles")
});

/// Postgres SQLSTATE for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

/// Exchange an email/password pair for an access token.
///
/// Several accounts may share an email (identities are `(username, email)`
/// pairs); the first one whose password verifies wins.
#[openapi(tag = "Auth")]
#[post("/login", data = "<payload>")]
pub async fn login(
    state: &State<AuthState>,
    pool: &State<sqlx::PgPool>,
    payload: Json<LoginRequest>,
) -> ApiResult<TokenResponse> {
    let email = payload.email.trim();
    if email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest("Email and password are required".into()).into());
    }

    let rows = sqlx::query(
        "SELECT username, email, password, role FROM users WHERE email = $1 ORDER BY id",
    )
    .bind(email)
    .fetch_all(pool.inner())
    .await
    .map_err(ApiError::from)?;

    for row in rows {
        let password_hash: String = row.try_get("password").map_err(ApiError::from)?;
        let verified = state
            .password_service
            .verify_password(&payload.password, &password_hash)
            .map_err(ApiError::from)?;
        if !verified {
            continue;
        }

        let username: String = row.try_get("username").map_err(ApiError::from)?;
        let db_email: String = row.try_get("email").map_err(ApiError::from)?;
        let role: String = row.try_get("role").map_err(ApiError::from)?;
        let token = state
            .jwt_service
            .issue_access_token(&username, &db_email, &role)
            .map_err(ApiError::from)?;

        log::info!("user '{}' logged in", username);
        return Ok(Json(TokenResponse::bearer(token.token)));
    }

    Err(ApiError::Unauthorized("Invalid credentials".into()).into())
}

/// Register a new account and return a token for it.
///
/// The account and its existence marker are written in one transaction.
#[openapi(tag = "Auth")]
#[post("/users", data = "<payload>")]
pub async fn register(
    state: &State<AuthState>,
    pool: &State<sqlx::PgPool>,
    payload: Json<UserCreate>,
) -> ApiResult<TokenResponse> {
    let username = payload.username.trim();
    let email = payload.email.trim();

    if !is_valid_email(email) {
        return Err(ApiError::BadRequest(
            "Invalid email. Expected format: user@domain.com".into(),
        )
        .into());
    }
    if username.is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest("Username and password are required".into()).into());
    }

    let password_hash = state
        .password_service
        .hash_password(&payload.password)
        .map_err(ApiError::from)?;

    let mut tx = pool.begin().await.map_err(ApiError::from)?;

    let role: String = sqlx::query_scalar(
        "INSERT INTO users (username, email, password, role) VALUES ($1, $2, $3, 'user') RETURNING role",
    )
    .bind(username)
    .bind(email)
    .bind(&password_hash)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| registration_error(err, username, email))?;

    sqlx::query("INSERT INTO existents (username, email) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(username)
        .bind(email)
        .execute(&mut *tx)
        .await
        .map_err(|err| registration_error(err, username, email))?;

    tx.commit().await.map_err(ApiError::from)?;

    let token = state
        .jwt_service
        .issue_access_token(username, email, &role)
        .map_err(ApiError::from)?;

    log::info!("registered user '{}'", username);
    Ok(Json(TokenResponse::bearer(token.token)))
}

fn registration_error(err: sqlx::Error, username: &str, email: &str) -> ApiError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            ApiError::BadRequest(format!(
                "User '{username}' with email '{email}' already exists"
            ))
        }
        _ => {
            log::error!("failed to create user '{}': {}", username, err);
            ApiError::InternalError("Unexpected error while creating user".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_email_shape() {
        assert!(is_valid_email("user@domain.com"));
        assert!(is_valid_email("first.last-1@sub.example.org"));
        assert!(!is_valid_email("user@domain"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("user|x@domain.com"));
        assert!(!is_valid_email("@domain.com"));
    }
}
