#[macro_use]
extern crate rocket;

pub mod auth;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod request_logger;
pub mod routes;
pub mod store;

use crate::auth::{AuthConfig, AuthState};
use crate::db::CaseDb;
use crate::ingest::{IngestConfig, Ingestor};
use crate::request_logger::RequestLogger;
use crate::store::PgIngestStore;
use env_logger::Env;
use rocket::data::{Limits, ToByteUnit};
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// Request body limits sized for CSV uploads.
pub fn upload_limits(config: &IngestConfig) -> Limits {
    let limit = (config.upload_limit_mib as u64).mebibytes();
    Limits::default()
        .limit("file", limit)
        .limit("data-form", limit)
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let ingest_config = IngestConfig::from_env();
    let figment = rocket::Config::figment().merge(("limits", upload_limits(&ingest_config)));

    // Configure CORS
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post, Method::Options]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    rocket::custom(figment)
        .attach(RequestLogger)
        .attach(CaseDb::init())
        .attach(cors)
        .attach(AdHoc::try_on_ignite("Ensure Schema", |rocket| async move {
            match CaseDb::fetch(&rocket) {
                Some(db) => {
                    let pool = (**db).clone();
                    match db::ensure_schema(&pool).await {
                        Ok(()) => Ok(rocket),
                        Err(e) => {
                            log::error!("failed to ensure database schema: {}", e);
                            Err(rocket)
                        }
                    }
                }
                None => {
                    log::error!("database pool not available for schema setup");
                    Err(rocket)
                }
            }
        }))
        // Manage the pool, auth services and the ingestion pipeline
        .attach(AdHoc::try_on_ignite(
            "Ingestion Services",
            move |rocket| async move {
                let pool = match CaseDb::fetch(&rocket) {
                    Some(db) => (**db).clone(),
                    None => {
                        log::error!("database pool not available for ingestion services");
                        return Err(rocket);
                    }
                };

                let auth_state = match AuthConfig::from_env().and_then(AuthState::from_config) {
                    Ok(state) => state,
                    Err(e) => {
                        log::error!("failed to initialize authentication: {}", e);
                        return Err(rocket);
                    }
                };

                let ingestor = Ingestor::new(
                    Arc::new(PgIngestStore::new(pool.clone())),
                    Arc::clone(&auth_state.password_service),
                    Arc::clone(&auth_state.jwt_service),
                    ingest_config,
                );

                Ok(rocket.manage(pool).manage(auth_state).manage(ingestor))
            },
        ))
        .mount(
            "/",
            openapi_get_routes![
                // Service routes
                routes::health::root,
                routes::health::health_check,
                // Auth routes
                auth::routes::login,
                auth::routes::register,
                // Ingestion and reporting
                routes::populate::populate,
                routes::metrics::list_metrics,
            ],
        )
        .mount(
            "/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../openapi.json".to_owned(),
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};
    use jsonwebtoken::Algorithm;
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::sqlx::{self, PgPool};

    use crate::auth::config::PasswordCost;
    use crate::auth::{AuthConfig, AuthState};
    use crate::ingest::{IngestConfig, Ingestor};
    use crate::store::IngestStore;

    pub use database::{TestDatabase, TestDatabaseError};

    /// Auth configuration with a fixed secret and cheap hashing for tests.
    pub fn test_auth_config() -> AuthConfig {
        AuthConfig {
            issuer: "https://case.test".into(),
            audience: "case-api".into(),
            access_token_ttl_secs: 900,
            jwt_secret: "integration-test-secret".into(),
            jwt_algorithm: Algorithm::HS256,
            password_cost: PasswordCost {
                m_cost_kib: 64,
                t_cost: 1,
                p_cost: 1,
            },
        }
    }

    pub fn test_auth_state() -> AuthState {
        AuthState::from_config(test_auth_config()).expect("test auth state")
    }

    /// Convenience helpers for seeding user and metric tables in tests.
    pub struct TestFixtures<'a> {
        pool: &'a PgPool,
    }

    impl<'a> TestFixtures<'a> {
        /// Create a fixture helper bound to the provided pool.
        pub fn new(pool: &'a PgPool) -> Self {
            Self { pool }
        }

        /// Insert a user row with an already hashed password, returning its id.
        pub async fn insert_user(
            &self,
            username: &str,
            email: &str,
            password_hash: &str,
            role: &str,
        ) -> Result<i32, sqlx::Error> {
            sqlx::query_scalar(
                "INSERT INTO users (username, email, password, role) VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .bind(username)
            .bind(email)
            .bind(password_hash)
            .bind(role)
            .fetch_one(self.pool)
            .await
        }

        /// Insert one metric row with fixed counters.
        pub async fn insert_metric(
            &self,
            date: NaiveDate,
            account_id: i64,
            campaign_id: i64,
            clicks: f64,
        ) -> Result<(), sqlx::Error> {
            let now = Utc::now();
            sqlx::query(
                r#"INSERT INTO metrics (
                       date, account_id, campaign_id, cost_micros, clicks,
                       conversions, impressions, interactions, created_at, updated_at
                   ) VALUES ($1, $2, $3, NULL, $4, 0, 100, 1, $5, $5)"#,
            )
            .bind(date)
            .bind(account_id)
            .bind(campaign_id)
            .bind(clicks)
            .bind(now)
            .execute(self.pool)
            .await?;
            Ok(())
        }
    }

    pub mod database {
        use rocket_db_pools::sqlx::postgres::PgPoolOptions;
        use rocket_db_pools::sqlx::{self, PgPool};
        use testcontainers::{ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner};
        use testcontainers_modules::postgres::Postgres;
        use thiserror::Error;

        use crate::db::ensure_schema;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Disposable Postgres container with the schema applied.
        pub struct TestDatabase {
            pool: PgPool,
            _container: ContainerAsync<Postgres>,
        }

        impl TestDatabase {
            /// Launch a container and connect to its default database.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = Postgres::default().start().await?;
                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect(&url)
                    .await?;
                ensure_schema(&pool).await?;

                Ok(Self {
                    pool,
                    _container: container,
                })
            }

            pub fn pool(&self) -> &PgPool {
                &self.pool
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool.clone()
            }

            /// Close pool connections; the container stops when dropped.
            pub async fn close(self) {
                self.pool.close().await;
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        pg_pool: Option<PgPool>,
        auth_state: Option<AuthState>,
        ingestor: Option<Ingestor>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false))
                .merge(("limits", crate::upload_limits(&IngestConfig::default())));

            Self {
                figment,
                ..Default::default()
            }
        }

        /// Mount routes at the root, as the service does.
        pub fn mount_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/".to_string(), routes));
            self
        }

        /// Manage a `PgPool` instance for tests that exercise database-backed routes.
        pub fn manage_pg_pool(mut self, pool: PgPool) -> Self {
            self.pg_pool = Some(pool);
            self
        }

        pub fn manage_auth_state(mut self, state: AuthState) -> Self {
            self.auth_state = Some(state);
            self
        }

        /// Manage an ingestor writing to `store`, sharing the builder's auth services.
        pub fn manage_ingestor(mut self, store: Arc<dyn IngestStore>, config: IngestConfig) -> Self {
            let auth = self.auth_state.get_or_insert_with(test_auth_state);
            let ingestor = Ingestor::new(
                store,
                Arc::clone(&auth.password_service),
                Arc::clone(&auth.jwt_service),
                config,
            );
            self.ingestor = Some(ingestor);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(pool) = self.pg_pool {
                rocket = rocket.manage(pool);
            }
            if let Some(state) = self.auth_state {
                rocket = rocket.manage(state);
            }
            if let Some(ingestor) = self.ingestor {
                rocket = rocket.manage(ingestor);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
