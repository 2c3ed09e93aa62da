use std::str::FromStr;

use jsonwebtoken::Algorithm;

use crate::auth::{AuthError, AuthResult};

/// Argon2id cost parameters used for every stored password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordCost {
    pub m_cost_kib: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for PasswordCost {
    fn default() -> Self {
        Self {
            m_cost_kib: 19 * 1024, // 19 MiB
            t_cost: 2,
            p_cost: 1,
        }
    }
}

/// Authentication configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl_secs: i64,
    pub jwt_secret: String,
    pub jwt_algorithm: Algorithm,
    pub password_cost: PasswordCost,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AuthConfig {
    pub fn from_env() -> AuthResult<Self> {
        let issuer = std::env::var("CASE_JWT_ISSUER").unwrap_or_else(|_| "http://localhost".into());
        let audience = std::env::var("CASE_JWT_AUDIENCE").unwrap_or_else(|_| "case-api".into());
        let access_token_ttl_secs = env_parse("CASE_ACCESS_TOKEN_TTL_SECS", 30 * 60);
        let jwt_secret = std::env::var("CASE_JWT_SECRET")
            .ok()
            .filter(|secret| !secret.trim().is_empty())
            .ok_or_else(|| AuthError::Config("CASE_JWT_SECRET is required".into()))?;
        let jwt_algorithm = parse_hmac_algorithm(
            &std::env::var("CASE_JWT_ALGORITHM").unwrap_or_else(|_| "HS256".into()),
        )?;

        let defaults = PasswordCost::default();
        let password_cost = PasswordCost {
            m_cost_kib: env_parse("CASE_ARGON2_M_COST_KIB", defaults.m_cost_kib),
            t_cost: env_parse("CASE_ARGON2_T_COST", defaults.t_cost),
            p_cost: env_parse("CASE_ARGON2_P_COST", defaults.p_cost),
        };

        Ok(Self {
            issuer,
            audience,
            access_token_ttl_secs,
            jwt_secret,
            jwt_algorithm,
            password_cost,
        })
    }
}

/// Only shared-secret algorithms are accepted; the signing key is a plain secret.
pub fn parse_hmac_algorithm(value: &str) -> AuthResult<Algorithm> {
    let algorithm = Algorithm::from_str(value.trim())
        .map_err(|_| AuthError::Config(format!("unknown JWT algorithm '{value}'")))?;
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
        other => Err(AuthError::Config(format!(
            "JWT algorithm {other:?} requires a key pair; use HS256, HS384 or HS512"
        ))),
    }
}
