//! Authentication module: configuration, password hashing, token minting,
//! and the login/registration route handlers.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod jwt;
pub mod passwords;
pub mod responses;
pub mod routes;

pub use config::AuthConfig;
pub use error::{AuthError, AuthResult};
pub use jwt::JwtService;
pub use passwords::PasswordService;

#[derive(Clone)]
pub struct AuthState {
    pub config: AuthConfig,
    pub password_service: Arc<PasswordService>,
    pub jwt_service: Arc<JwtService>,
}

impl AuthState {
    pub fn new(config: AuthConfig, password_service: PasswordService, jwt_service: JwtService) -> Self {
        Self {
            config,
            password_service: Arc::new(password_service),
            jwt_service: Arc::new(jwt_service),
        }
    }

    /// Build every auth service from a loaded configuration.
    pub fn from_config(config: AuthConfig) -> AuthResult<Self> {
        let password_service = PasswordService::with_cost(config.password_cost)?;
        let jwt_service = JwtService::from_config(&config)?;
        Ok(Self::new(config, password_service, jwt_service))
    }
}
